mod common;

use gpuwire_protocol::cmd::QueueWriteBuffer;
use gpuwire_protocol::{Command, Return, WireMessage};
use proptest::prelude::*;

use common::{id, sample_commands, sample_returns};

#[test]
fn every_truncation_of_every_record_fails() {
    for cmd in sample_commands() {
        let bytes = cmd.to_bytes();
        for k in 0..bytes.len() {
            let err = Command::deserialize(&bytes[..k]).unwrap_err();
            assert!(err.is_truncation(), "{} k={k}: {err}", cmd.opcode().name());
        }
    }
    for ret in sample_returns() {
        let bytes = ret.to_bytes();
        for k in 0..bytes.len() {
            assert!(Return::deserialize(&bytes[..k]).is_err());
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 512,
        rng_algorithm: proptest::test_runner::RngAlgorithm::ChaCha,
        rng_seed: proptest::test_runner::RngSeed::Fixed(0x6770_7577),
        .. ProptestConfig::default()
    })]

    #[test]
    fn random_bytes_never_panic(bytes in proptest::collection::vec(any::<u8>(), 0..=512)) {
        let res = std::panic::catch_unwind(|| {
            let _ = Command::deserialize(&bytes);
            let _ = Return::deserialize(&bytes);
        });
        prop_assert!(res.is_ok(), "decoder panicked (len={})", bytes.len());
    }

    #[test]
    fn corrupted_records_never_panic(
        which in 0usize..31,
        flips in proptest::collection::vec((any::<prop::sample::Index>(), any::<u8>()), 1..8),
    ) {
        let samples = sample_commands();
        let mut bytes = samples[which % samples.len()].to_bytes();
        for (at, value) in flips {
            let i = at.index(bytes.len());
            bytes[i] = value;
        }
        let res = std::panic::catch_unwind(|| Command::deserialize(&bytes).map(|(_, n)| n));
        prop_assert!(res.is_ok());
        if let Ok(Ok(consumed)) = res {
            prop_assert!(consumed <= bytes.len());
        }
    }

    #[test]
    fn write_buffer_round_trips(offset in any::<u64>(), data in proptest::collection::vec(any::<u8>(), 0..=2048)) {
        let cmd: Command = QueueWriteBuffer {
            queue: id(0, 0),
            buffer: id(3, 7),
            offset,
            data,
        }
        .into();
        let bytes = cmd.to_bytes();
        prop_assert_eq!(bytes.len(), cmd.required_size());
        let (decoded, consumed) = Command::deserialize(&bytes).unwrap();
        prop_assert_eq!(consumed, bytes.len());
        prop_assert_eq!(decoded, cmd);
    }
}
