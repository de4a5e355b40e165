// SPDX-License-Identifier: PMPL-1.0-or-later
// Fuzz target for reading arbitrary store bytes back as records

#![no_main]

use libfuzzer_sys::fuzz_target;
use seglog_engine::store::{Store, LEN_WIDTH};
use seglog_engine::Record;

fuzz_target!(|data: &[u8]| {
    // Decoding arbitrary bytes must fail cleanly, never panic.
    let _ = Record::decode(data, 0);

    // Treat the input as a store file and walk its framed entries.
    let Ok(dir) = tempfile::tempdir() else {
        return;
    };
    let path = dir.path().join("0.store");
    if std::fs::write(&path, data).is_err() {
        return;
    }
    let Ok(store) = Store::open(&path) else {
        return;
    };

    let mut position = 0u64;
    let mut offset = 0u64;
    while let Ok(payload) = store.read(position) {
        let _ = Record::decode(&payload, offset);
        position += LEN_WIDTH + payload.len() as u64;
        offset += 1;
    }
    let _ = store.close();
});
