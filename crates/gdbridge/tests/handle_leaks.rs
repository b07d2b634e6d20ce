// Leak accounting against the headless engine.
//
// Runs a mixed workload twice and checks that every engine allocation made by
// the second pass is gone afterwards. The first pass warms the resolver
// caches, which hold class names until shutdown.
//
// One test only, since the engine counters are process-wide.

mod common;

use common::{Node, Resource};
use gdbridge::builtin::{Callable, PackedArray, Vector2};
use gdbridge::{
    Array, Decode, Dictionary, Encode, GString, Lifetime, NodePath, Owned, Ref, StringName, Value,
};

fn workload() {
    let runtime = common::runtime();
    let mut lifetime = Lifetime::with_runtime(runtime.clone());

    let greeting = GString::new(&lifetime, "hello").unwrap();
    let _copy = greeting.duplicate(&lifetime).unwrap();
    let _name = StringName::new(&lifetime, "ready").unwrap();
    let _path = NodePath::new(&lifetime, "Root/Player").unwrap();

    let mut array = Array::new(&lifetime).unwrap();
    for i in 0..4i64 {
        let item = i.encode(&lifetime).unwrap();
        array.push(&runtime, &item).unwrap();
    }
    let nested = "inner".encode(&lifetime).unwrap();
    array.push(&runtime, &nested).unwrap();
    if let Some(item) = array.get(&runtime, 4).unwrap() {
        assert_eq!(String::decode(&item, &lifetime).unwrap(), "inner");
    }

    let mut dict = Dictionary::new(&lifetime).unwrap();
    let key = "k".encode(&lifetime).unwrap();
    let value = Vector2 { x: 1.0, y: 2.0 }.encode(&lifetime).unwrap();
    dict.set(&runtime, &key, &value).unwrap();
    let keys = dict.keys(&runtime).unwrap();
    assert_eq!(keys.len(&runtime).unwrap(), 1);
    drop(keys);
    assert_eq!(dict.entries(&runtime).unwrap().len(), 1);

    let mut packed = PackedArray::<GString>::from_slice(&lifetime, &["a".to_owned(), "b".to_owned()]).unwrap();
    packed.resize(&runtime, 3).unwrap();
    assert_eq!(packed.to_vec(&runtime).unwrap(), ["a", "b", ""]);

    let tree = Value::Array(vec![
        Value::Int(1),
        Value::Dictionary(vec![(Value::String("x".into()), Value::PackedInt32Array(vec![1, 2]))]),
        Value::NodePath("a/b".into()),
    ]);
    let encoded = tree.encode(&lifetime).unwrap();
    assert_eq!(Value::decode(&encoded, &lifetime).unwrap(), tree);

    let owned = GString::owned("kept").unwrap();
    let _twin = owned.duplicate().unwrap();
    let adopted = owned.into_local(&lifetime).unwrap();
    let _out = adopted.to_owned_handle().unwrap();

    let node = Owned::<Node>::new().unwrap();
    let _callable = Callable::new(&lifetime, &*node, "queue_free").unwrap();
    let resource = Ref::<Resource>::new().unwrap();
    let _shared = resource.try_clone().unwrap();
    let _as_variant = resource.encode(&lifetime).unwrap();

    assert!(lifetime.end() > 0);
}

#[test]
fn test_mixed_workload_releases_everything() {
    workload();
    let baseline = gdbridge_headless::stats();

    workload();
    assert_eq!(gdbridge_headless::stats(), baseline);
}
