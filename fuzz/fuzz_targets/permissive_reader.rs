#![no_main]
use libfuzzer_sys::fuzz_target;
use marc_codec::PermissiveReader;
use std::io::Cursor;

fuzz_target!(|data: &[u8]| {
    // every call must consume input, so the stream ends within len + 1 reads
    let mut reader = PermissiveReader::new(Cursor::new(data));
    for _ in 0..=data.len() {
        match reader.read_record() {
            Ok(None) => return,
            Ok(Some(_)) | Err(_) => {},
        }
    }
    panic!("permissive reader did not reach the end of the input");
});
