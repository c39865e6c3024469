#![no_main]

use std::collections::HashMap;

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

use radtab::RadixTrie;

#[derive(Arbitrary, Debug)]
enum TrieMethod {
    GetOrPut { bytes: Vec<u8> },
    Find { bytes: Vec<u8> },
    Read { nth: usize },
}

fuzz_target!(|methods: Vec<TrieMethod>| {
    let trie = RadixTrie::new();
    let mut interned = HashMap::<Vec<u8>, radtab::NodeIndex>::new();
    let mut order = Vec::new();

    for m in methods.iter().take(4096) {
        match m {
            TrieMethod::GetOrPut { bytes } => {
                let nodes_before = trie.len();
                let index = trie.get_or_put(bytes).unwrap();
                match interned.get(bytes) {
                    Some(expected) => {
                        assert_eq!(index, *expected, "index moved for {:?}", bytes);
                        assert_eq!(trie.len(), nodes_before);
                    }
                    None => {
                        // One new leaf, plus at most one branch node from a split.
                        assert!(trie.len() <= nodes_before + 2);
                        interned.insert(bytes.clone(), index);
                        order.push(bytes.clone());
                    }
                }
            }
            TrieMethod::Find { bytes } => {
                if let Some(expected) = interned.get(bytes) {
                    assert_eq!(trie.find(bytes), Some(*expected));
                }
            }
            TrieMethod::Read { nth } => {
                if order.is_empty() {
                    continue;
                }
                let bytes = &order[nth % order.len()];
                let index = interned[bytes];
                assert_eq!(trie.read(index).as_ref(), Some(bytes));
            }
        }
    }

    for (bytes, index) in &interned {
        assert_eq!(trie.read(*index).as_ref(), Some(bytes));
        assert_eq!(trie.get_or_put(bytes).unwrap(), *index);
    }
});
