#![no_main]

use std::collections::HashMap;

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

use radtab::{GenerationalTable, Key, TableConfig};

#[derive(Arbitrary, Debug)]
enum TableMethod {
    Create { val: u32 },
    AwaitNew,
    Get { nth: usize },
    Set { nth: usize, val: u32 },
    Destroy { nth: usize },
    Clear,
    Trim,
}

fuzz_target!(|methods: Vec<TableMethod>| {
    // Narrow fields so that capacity limits are reachable.
    let config = TableConfig::new(8, 16);
    let table = GenerationalTable::<u32, u32>::with_config(&config).unwrap();
    let mut model = HashMap::<Key<u32>, Option<u32>>::new();
    let mut issued: Vec<Key<u32>> = Vec::new();

    for m in methods.iter().take(4096) {
        match m {
            TableMethod::Create { val } => match table.create(*val) {
                Ok(key) => {
                    assert!(model.insert(key, Some(*val)).is_none(), "key reissued");
                    issued.push(key);
                }
                Err(err) => {
                    assert_eq!(model.len(), 256, "create failed early: {}", err);
                }
            },
            TableMethod::AwaitNew => {
                if let Ok(key) = table.await_new() {
                    assert!(model.insert(key, None).is_none(), "key reissued");
                    issued.push(key);
                }
            }
            TableMethod::Get { nth } => {
                if issued.is_empty() {
                    continue;
                }
                let key = issued[nth % issued.len()];
                assert_eq!(table.get(key), model.get(&key).copied().flatten());
                assert_eq!(table.is_valid(key), model.contains_key(&key));
            }
            TableMethod::Set { nth, val } => {
                if issued.is_empty() {
                    continue;
                }
                let key = issued[nth % issued.len()];
                let result = table.try_set(key, *val);
                match model.get_mut(&key) {
                    Some(slot) => assert_eq!(result, Ok(slot.replace(*val))),
                    None => assert!(result.is_err()),
                }
            }
            TableMethod::Destroy { nth } => {
                if issued.is_empty() {
                    continue;
                }
                let key = issued[nth % issued.len()];
                let result = table.try_destroy(key);
                match model.remove(&key) {
                    Some(value) => assert_eq!(result, Ok(value)),
                    None => assert!(result.is_err()),
                }
            }
            TableMethod::Clear => {
                table.clear();
                model.clear();
            }
            TableMethod::Trim => {
                table.trim();
            }
        }
        assert_eq!(table.live_count(), model.len());
    }

    let slice = table.slice();
    let mut last = None;
    let mut seen = 0;
    for (key, value) in slice.iter() {
        assert_eq!(model.get(&key), Some(&Some(*value)));
        let index = table.layout().index(key);
        assert!(last < Some(index));
        last = Some(index);
        seen += 1;
    }
    assert_eq!(seen, model.values().filter(|v| v.is_some()).count());
});
