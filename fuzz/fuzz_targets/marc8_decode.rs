#![no_main]
use libfuzzer_sys::fuzz_target;
use marc_codec::{ErrorHandler, Marc8ToUnicode, UnicodeToMarc8};

fuzz_target!(|data: &[u8]| {
    let decoder = Marc8ToUnicode::new().expect("bundled tables");
    let _ = decoder.convert(data);

    let mut errors = ErrorHandler::new();
    if let Ok(text) = decoder.convert_with(data, &mut errors) {
        let encoder = UnicodeToMarc8::new().expect("bundled tables");
        let _ = encoder.convert(&text);
    }
});
