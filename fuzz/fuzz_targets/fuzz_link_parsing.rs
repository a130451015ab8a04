#![no_main]

use libfuzzer_sys::fuzz_target;

use stowage::links::{filename_from_link, DefaultLinkResolver, LinkResolver};
use stowage::media::{content_disposition_filename, sanitize_filename};

fuzz_target!(|data: &[u8]| {
    let Ok(input) = std::str::from_utf8(data) else {
        return;
    };

    if let Some(name) = content_disposition_filename(input) {
        let sanitized = sanitize_filename(&name);
        assert!(sanitized.len() <= 255);
        assert!(!sanitized.contains('/'));
        assert!(!sanitized.contains('\\'));
    }

    let resolver = DefaultLinkResolver::new();
    if let Ok(info) = resolver.resolve(input) {
        let scheme = info.download_link.get(..5).unwrap_or("").to_ascii_lowercase();
        assert!(scheme.starts_with("http"));
        assert_eq!(info.original, input.trim());
        let _ = filename_from_link(&info.download_link);
    }
});
