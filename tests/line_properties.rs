//! Property tests for line assembly and the reference transform.
//!
//! These drive `ConnectionState` directly, without sockets, so they can cover
//! arbitrary byte sequences and arbitrary read boundaries.

use proptest::prelude::*;

use rotline::{ConnectionState, LineRoute, Rot13, Transform};

const WATERMARK: usize = 256;

fn line_body(max: usize) -> impl Strategy<Value = Vec<u8>> {
    proptest::collection::vec(any::<u8>().prop_filter("no delimiter", |b| *b != b'\n'), 0..max)
}

fn echo_state() -> ConnectionState {
    ConnectionState::new(WATERMARK, b'\n', 64, LineRoute::Echo)
}

proptest! {
    #[test]
    fn terminated_line_comes_back_transformed(body in line_body(WATERMARK)) {
        let mut state = echo_state();
        let mut input = body.clone();
        input.push(b'\n');

        state.ingest(&input, &Rot13);

        let mut expected = Rot13.apply_slice(&body);
        expected.push(b'\n');
        prop_assert_eq!(state.pending_output(), &expected[..]);
        prop_assert!(state.buffered_input().is_empty());
    }

    #[test]
    fn unterminated_input_below_watermark_is_held(body in line_body(WATERMARK)) {
        let mut state = echo_state();
        state.ingest(&body, &Rot13);

        prop_assert!(!state.has_pending_output());
        prop_assert_eq!(state.buffered_input().len(), body.len());
    }

    #[test]
    fn watermark_sized_input_is_flushed(body in proptest::collection::vec(
        any::<u8>().prop_filter("no delimiter", |b| *b != b'\n'),
        WATERMARK,
    )) {
        let mut state = echo_state();
        let report = state.ingest(&body, &Rot13);

        let mut expected = Rot13.apply_slice(&body);
        expected.push(b'\n');
        prop_assert_eq!(report.forced_flushes, 1);
        prop_assert_eq!(state.pending_output(), &expected[..]);
        prop_assert!(state.buffered_input().is_empty());
    }

    #[test]
    fn read_boundaries_do_not_change_the_output(
        input in proptest::collection::vec(any::<u8>(), 0..2048),
        cut in 1usize..97,
    ) {
        let mut whole = echo_state();
        whole.ingest(&input, &Rot13);

        let mut pieces = echo_state();
        for chunk in input.chunks(cut) {
            pieces.ingest(chunk, &Rot13);
        }

        prop_assert_eq!(whole.pending_output(), pieces.pending_output());
        prop_assert_eq!(whole.buffered_input(), pieces.buffered_input());
    }

    #[test]
    fn rot13_twice_is_identity(bytes in proptest::collection::vec(any::<u8>(), 0..512)) {
        prop_assert_eq!(Rot13.apply_slice(&Rot13.apply_slice(&bytes)), bytes);
    }
}
