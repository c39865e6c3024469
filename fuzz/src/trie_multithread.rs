#![no_main]

use std::collections::HashMap;
use std::sync::{Arc, Barrier};
use std::thread;

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

use radtab::{NodeIndex, RadixTrie};

#[derive(Arbitrary, Debug)]
struct MultithreadedFuzzInput {
    // Number of threads to spawn (1-8)
    num_threads: u8,
    // Strings each thread interns, in its own order
    thread_words: Vec<Vec<Vec<u8>>>,
}

fuzz_target!(|input: MultithreadedFuzzInput| {
    let num_threads = ((input.num_threads % 8) + 1) as usize;
    let trie = Arc::new(RadixTrie::new());
    let barrier = Arc::new(Barrier::new(num_threads));

    let mut thread_handles = Vec::new();
    for thread_id in 0..num_threads {
        let words = input
            .thread_words
            .get(thread_id)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .take(200)
            .collect::<Vec<_>>();
        let trie = Arc::clone(&trie);
        let barrier = Arc::clone(&barrier);
        thread_handles.push(thread::spawn(move || {
            barrier.wait();
            words
                .into_iter()
                .map(|word| {
                    let index = trie.get_or_put(&word).unwrap();
                    (word, index)
                })
                .collect::<Vec<_>>()
        }));
    }

    let mut agreed = HashMap::<Vec<u8>, NodeIndex>::new();
    let mut owners = HashMap::<NodeIndex, Vec<u8>>::new();
    for handle in thread_handles {
        for (word, index) in handle.join().expect("Thread panicked") {
            let previous = agreed.insert(word.clone(), index);
            assert!(
                previous.is_none() || previous == Some(index),
                "threads disagree on {:?}",
                word
            );
            let owner = owners.entry(index).or_insert_with(|| word.clone());
            assert_eq!(*owner, word, "{} names two strings", index);
        }
    }

    for (word, index) in &agreed {
        assert_eq!(trie.read(*index).as_ref(), Some(word));
        assert_eq!(trie.get_or_put(word).unwrap(), *index);
    }
});
