use gpuwire_dump::{decode_capture, messages, Direction, DumpError, DumpOptions};
use gpuwire_ipc::{ChunkedSerializer, CommandSerializer, TransportLimits};
use gpuwire_protocol::cmd::{BufferUnmap, ComputePassDispatch, QueueWriteBuffer};
use gpuwire_protocol::ret::DeviceLost;
use gpuwire_protocol::types::DeviceLostReason;
use gpuwire_protocol::{Command, DecodeError, ObjectId, Return, WireMessage};
use pretty_assertions::assert_eq;

const LIMITS: TransportLimits = TransportLimits {
    max_message_bytes: 4096,
    chunk_size: 64,
};

fn capture<M: WireMessage>(records: &[M]) -> Vec<u8> {
    let mut ser = ChunkedSerializer::new(Vec::<Vec<u8>>::new(), LIMITS);
    for record in records {
        let space = ser.get_cmd_space(record.required_size()).unwrap();
        record.serialize(space);
    }
    assert!(ser.flush());
    ser.sink().concat()
}

fn opts(direction: Direction) -> DumpOptions {
    DumpOptions {
        direction,
        raw: false,
        limits: LIMITS,
    }
}

fn sample_commands() -> Vec<Command> {
    vec![
        BufferUnmap {
            buffer: ObjectId::new(3, 1),
        }
        .into(),
        QueueWriteBuffer {
            queue: ObjectId::new(0, 0),
            buffer: ObjectId::new(3, 1),
            offset: 16,
            data: vec![0xAB; 200],
        }
        .into(),
        ComputePassDispatch {
            pass: ObjectId::new(1, 0),
            x: 8,
            y: 4,
            z: 1,
        }
        .into(),
    ]
}

#[test]
fn chunked_capture_decodes_in_order() {
    let cmds = sample_commands();
    let records = decode_capture(&capture(&cmds), &opts(Direction::Commands)).unwrap();

    let names: Vec<_> = records.iter().map(|r| r.opcode).collect();
    assert_eq!(names, vec!["BufferUnmap", "QueueWriteBuffer", "ComputePassDispatch"]);
    for (record, cmd) in records.iter().zip(&cmds) {
        assert_eq!(record.size, cmd.required_size());
        assert_eq!(record.detail, format!("{cmd:?}"));
    }
}

#[test]
fn oversized_records_are_split_and_reassembled() {
    let cmds = sample_commands();
    let bytes = capture(&cmds);
    let msgs = messages(&bytes, &opts(Direction::Commands)).unwrap();
    let total: usize = msgs.iter().map(Vec::len).sum();
    assert_eq!(total, cmds.iter().map(WireMessage::required_size).sum::<usize>());
    assert!(msgs.iter().any(|m| m.len() > LIMITS.chunk_size));
}

#[test]
fn raw_returns_capture() {
    let ret: Return = DeviceLost {
        device: ObjectId::new(0, 2),
        reason: DeviceLostReason::Destroyed,
        message: "gone".into(),
    }
    .into();
    let opts = DumpOptions {
        raw: true,
        ..opts(Direction::Returns)
    };
    let records = decode_capture(&ret.to_bytes(), &opts).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].opcode, "DeviceLost");
    assert_eq!(records[0].offset, 0);
    assert!(records[0].to_string().contains("DeviceLost"));
}

#[test]
fn decode_errors_report_their_position() {
    let mut bytes = Command::from(BufferUnmap {
        buffer: ObjectId::new(0, 0),
    })
    .to_bytes();
    let first = bytes.len();
    bytes.extend_from_slice(&0x0fffu32.to_le_bytes());
    bytes.extend_from_slice(&8u32.to_le_bytes());

    let opts = DumpOptions {
        raw: true,
        ..opts(Direction::Commands)
    };
    let err = decode_capture(&bytes, &opts).unwrap_err();
    match err {
        DumpError::Decode {
            message: 0,
            offset,
            source: DecodeError::UnknownOpcode(0x0fff),
        } => assert_eq!(offset, first),
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn truncated_chunk_stream_is_an_error() {
    let bytes = capture(&sample_commands());
    let err = decode_capture(&bytes[..bytes.len() - 3], &opts(Direction::Commands)).unwrap_err();
    assert!(matches!(err, DumpError::Transport(_)));
}

#[test]
fn commands_do_not_decode_as_returns() {
    let err = decode_capture(&capture(&sample_commands()), &opts(Direction::Returns)).unwrap_err();
    assert!(matches!(err, DumpError::Decode { message: 0, offset: 0, .. }));
}
