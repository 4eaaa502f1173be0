//! Byte-stream fuzzing: for any input, feeding the terminal never panics,
//! never errors (with an infallible writer), and leaves every page-list
//! invariant intact.

use core_term::{Config, Terminal};
use core_vt::stream::Stream;
use proptest::prelude::*;

fn init_logs() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Escape-sequence-flavored input: raw bytes mixed with sequence
/// fragments, so the generator actually reaches the deep handler paths.
fn payload() -> impl Strategy<Value = Vec<u8>> {
    let fragment = prop_oneof![
        proptest::collection::vec(any::<u8>(), 0..12),
        "[ -~]{0,10}".prop_map(|s| s.into_bytes()),
        Just(b"\x1b[".to_vec()),
        Just(b"\x1b[2J".to_vec()),
        Just(b"\x1b[1;5H".to_vec()),
        Just(b"\x1b[38;5;20mcolored".to_vec()),
        Just(b"\x1b[?1049h".to_vec()),
        Just(b"\x1b[?1049l".to_vec()),
        Just(b"\x1b[3;8r\x1b[S\x1b[T".to_vec()),
        Just(b"\x1b[5L\x1b[2M\x1b[4@\x1b[3P\x1b[6X".to_vec()),
        Just(b"\x1b]8;;http://x\x07link\x1b]8;;\x07".to_vec()),
        Just("wide 界界 text".as_bytes().to_vec()),
        Just(b"\r\n\t\x08".to_vec()),
        Just(b"\x1bM\x1b7\x1b8\x1b#8".to_vec()),
    ];
    proptest::collection::vec(fragment, 0..16).prop_map(|f| f.concat())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(96))]

    #[test]
    fn invariants_hold_after_every_chunk(chunks in proptest::collection::vec(payload(), 1..6)) {
        init_logs();
        let mut stream = Stream::new(Terminal::new(Config::sized(20, 6), Vec::new()));
        for chunk in chunks {
            stream.next_slice(&chunk).unwrap();
            let check = stream.handler.grid().verify_integrity();
            prop_assert!(check.is_ok(), "{:?}", check.err());
        }
    }

    #[test]
    fn small_grids_survive_arbitrary_bytes(bytes in proptest::collection::vec(any::<u8>(), 0..300)) {
        let mut stream = Stream::new(Terminal::new(Config::sized(4, 2), Vec::new()));
        stream.next_slice(&bytes).unwrap();
        stream.handler.grid().verify_integrity().unwrap();
    }
}
