use std::sync::{Arc, Mutex};

use gpuwire_core::*;
use gpuwire_ipc::{loopback_pair, ChunkedSerializer, FlushedBytes, MemorySerializer, TransportLimits};
use gpuwire_protocol::cmd::*;
use gpuwire_protocol::ret::*;
use gpuwire_protocol::types::*;
use gpuwire_protocol::{Command, ObjectId, ObjectType, Records, Return, WireMessage};
use pretty_assertions::assert_eq;

/// Collects callback results.
fn slot<T: Send + 'static>() -> (Arc<Mutex<Vec<T>>>, impl FnOnce(T) + Send + 'static) {
    let slot = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&slot);
    (slot, move |value| sink.lock().unwrap().push(value))
}

fn client() -> (WireClient, FlushedBytes) {
    let (serializer, out) = MemorySerializer::new(1 << 16);
    (WireClient::new(Box::new(serializer), &WireConfig::default()), out)
}

fn sent(client: &mut WireClient, out: &FlushedBytes) -> Vec<Command> {
    client.flush().unwrap();
    Records::<Command>::new(&out.take())
        .map(|r| r.unwrap().1)
        .collect()
}

fn deliver(client: &mut WireClient, rets: Vec<Return>) -> Result<(), FatalError> {
    let bytes: Vec<u8> = rets.iter().flat_map(|r| r.to_bytes()).collect();
    client.handle_commands(&bytes)
}

struct Opened {
    device: Device,
    queue: Queue,
    lost: Arc<Mutex<Vec<(DeviceLostReason, String)>>>,
}

fn open_device(client: &mut WireClient, out: &FlushedBytes) -> Opened {
    let (adapter, cb) = slot::<AdapterResponse>();
    client.request_adapter(&RequestAdapterOptions::default(), cb).unwrap();
    let request_id = match sent(client, out).as_slice() {
        [Command::InstanceRequestAdapter(c)] => c.request_id,
        other => panic!("unexpected commands {other:?}"),
    };
    deliver(
        client,
        vec![RequestAdapterCallback {
            request_id,
            status: RequestStatus::Success,
            message: String::new(),
            info: Some(AdapterInfo::default()),
        }
        .into()],
    )
    .unwrap();
    let adapter = adapter.lock().unwrap()[0].adapter.unwrap();

    let lost = Arc::new(Mutex::new(Vec::new()));
    let lost_sink = Arc::clone(&lost);
    let callbacks = DeviceCallbacks {
        uncaptured_error: None,
        device_lost: Some(Box::new(move |reason: DeviceLostReason, message: &str| {
            lost_sink.lock().unwrap().push((reason, message.to_owned()))
        })),
    };
    let (device, cb) = slot::<DeviceResponse>();
    client
        .adapter_request_device(adapter, &DeviceDescriptor::default(), callbacks, cb)
        .unwrap();
    let request_id = match sent(client, out).as_slice() {
        [Command::AdapterRequestDevice(c)] => c.request_id,
        other => panic!("unexpected commands {other:?}"),
    };
    deliver(
        client,
        vec![RequestDeviceCallback {
            request_id,
            status: RequestStatus::Success,
            message: String::new(),
            limits: Some(Limits::default()),
        }
        .into()],
    )
    .unwrap();
    let response = device.lock().unwrap().remove(0);
    Opened {
        device: response.device.unwrap(),
        queue: response.queue.unwrap(),
        lost,
    }
}

#[test]
fn request_ids_start_at_one_and_increase() {
    let (mut client, out) = client();
    let first = client.request_adapter(&RequestAdapterOptions::default(), |_| {}).unwrap();
    let second = client.request_adapter(&RequestAdapterOptions::default(), |_| {}).unwrap();
    assert_eq!((first, second), (FutureId(1), FutureId(2)));

    let cmds = sent(&mut client, &out);
    assert_eq!(
        cmds,
        vec![
            InstanceRequestAdapter {
                request_id: 1,
                adapter: ObjectId::new(0, 0),
                options: RequestAdapterOptions::default(),
            }
            .into(),
            InstanceRequestAdapter {
                request_id: 2,
                adapter: ObjectId::new(1, 0),
                options: RequestAdapterOptions::default(),
            }
            .into(),
        ]
    );
    assert_eq!(client.pending_count(), 2);
}

#[test]
fn device_request_reports_limits() {
    let (mut client, out) = client();
    let opened = open_device(&mut client, &out);
    assert_eq!(client.device_limits(opened.device), Some(Limits::default()));
    assert_eq!(client.pending_count(), 0);
}

#[test]
fn failed_adapter_request_releases_the_id() {
    let (mut client, out) = client();
    let (result, cb) = slot::<AdapterResponse>();
    client.request_adapter(&RequestAdapterOptions::default(), cb).unwrap();
    sent(&mut client, &out);
    deliver(
        &mut client,
        vec![RequestAdapterCallback {
            request_id: 1,
            status: RequestStatus::Unavailable,
            message: "none".into(),
            info: None,
        }
        .into()],
    )
    .unwrap();

    let result = result.lock().unwrap().remove(0);
    assert_eq!(result.status, RequestStatus::Unavailable);
    assert_eq!(result.adapter, None);
    assert_eq!(client.live_objects(ObjectType::Adapter), 0);
    assert_eq!(
        sent(&mut client, &out),
        vec![DestroyObject {
            object_type: ObjectType::Adapter,
            id: ObjectId::new(0, 0),
        }
        .into()]
    );
}

#[test]
fn released_ids_are_reused_with_a_new_generation() {
    let (mut client, out) = client();
    let opened = open_device(&mut client, &out);
    let encoder = client.device_create_command_encoder(opened.device, None).unwrap();
    client.release(encoder).unwrap();
    let again = client.device_create_command_encoder(opened.device, Some("again")).unwrap();

    assert_eq!(encoder.id(), ObjectId::new(0, 0));
    assert_eq!(again.id(), ObjectId::new(0, 1));
    let cmds = sent(&mut client, &out);
    assert_eq!(cmds.len(), 3);
    assert_eq!(
        cmds[1],
        DestroyObject {
            object_type: ObjectType::CommandEncoder,
            id: ObjectId::new(0, 0),
        }
        .into()
    );
    assert_eq!(
        client.release(encoder),
        Err(ClientError::UnknownObject {
            object_type: ObjectType::CommandEncoder,
            id: ObjectId::new(0, 0),
        })
    );
}

#[test]
fn add_ref_defers_destruction() {
    let (mut client, out) = client();
    let opened = open_device(&mut client, &out);
    let module = client
        .device_create_shader_module(
            opened.device,
            &ShaderModuleDescriptor {
                label: None,
                code: "fn main() {}".into(),
            },
        )
        .unwrap();
    client.add_ref(module).unwrap();
    client.release(module).unwrap();
    assert_eq!(client.live_objects(ObjectType::ShaderModule), 1);
    client.release(module).unwrap();
    assert_eq!(client.live_objects(ObjectType::ShaderModule), 0);

    let destroys = sent(&mut client, &out)
        .into_iter()
        .filter(|c| matches!(c, Command::DestroyObject(_)))
        .count();
    assert_eq!(destroys, 1);
}

#[test]
fn invalid_map_requests_resolve_locally() {
    let (mut client, out) = client();
    let opened = open_device(&mut client, &out);
    let buffer = client
        .device_create_buffer(
            opened.device,
            &BufferDescriptor {
                label: None,
                size: 16,
                usage: BufferUsages::MAP_WRITE,
                mapped_at_creation: false,
            },
        )
        .unwrap();
    sent(&mut client, &out);

    let (results, cb) = slot::<MapResponse>();
    client.buffer_map_async(buffer, MapMode::READ, 0, 16, cb).unwrap();
    let (oob, cb) = slot::<MapResponse>();
    client.buffer_map_async(buffer, MapMode::WRITE, 8, 16, cb).unwrap();

    assert_eq!(results.lock().unwrap()[0].status, MapAsyncStatus::Error);
    assert_eq!(oob.lock().unwrap()[0].status, MapAsyncStatus::Error);
    assert_eq!(sent(&mut client, &out), vec![]);
    assert_eq!(client.pending_count(), 0);
}

#[test]
fn read_map_exposes_the_data_update() {
    let (mut client, out) = client();
    let opened = open_device(&mut client, &out);
    let buffer = client
        .device_create_buffer(
            opened.device,
            &BufferDescriptor {
                label: None,
                size: 8,
                usage: BufferUsages::MAP_READ,
                mapped_at_creation: false,
            },
        )
        .unwrap();
    let (results, cb) = slot::<MapResponse>();
    client.buffer_map_async(buffer, MapMode::READ, 4, 4, cb).unwrap();
    let request_id = match sent(&mut client, &out).as_slice() {
        [Command::DeviceCreateBuffer(create), Command::BufferMapAsync(map)] => {
            assert_eq!(create.read_handle, Some(Vec::new()));
            assert_eq!(create.write_handle, None);
            map.request_id
        }
        other => panic!("unexpected commands {other:?}"),
    };

    let mut early = [0u8; 4];
    assert!(matches!(
        client.buffer_read_mapped(buffer, 4, &mut early),
        Err(ClientError::InvalidMapState { .. })
    ));

    deliver(
        &mut client,
        vec![BufferMapAsyncCallback {
            buffer: buffer.id(),
            request_id,
            status: MapAsyncStatus::Success,
            message: String::new(),
            read_data: vec![5, 6, 7, 8],
        }
        .into()],
    )
    .unwrap();
    assert_eq!(results.lock().unwrap()[0].status, MapAsyncStatus::Success);

    let mut data = [0u8; 4];
    client.buffer_read_mapped(buffer, 4, &mut data).unwrap();
    assert_eq!(data, [5, 6, 7, 8]);
    assert_eq!(
        client.buffer_read_mapped(buffer, 2, &mut data),
        Err(ClientError::OutOfMappedRange { offset: 2, size: 4 })
    );
}

#[test]
fn write_map_flushes_only_the_dirty_range() {
    let (mut client, out) = client();
    let opened = open_device(&mut client, &out);
    let buffer = client
        .device_create_buffer(
            opened.device,
            &BufferDescriptor {
                label: None,
                size: 64,
                usage: BufferUsages::COPY_SRC,
                mapped_at_creation: true,
            },
        )
        .unwrap();
    client.buffer_write_mapped(buffer, 10, &[1, 2]).unwrap();
    client.buffer_write_mapped(buffer, 20, &[3]).unwrap();
    client.buffer_unmap(buffer).unwrap();

    let cmds = sent(&mut client, &out);
    assert_eq!(cmds.len(), 3);
    let mut expected = vec![0u8; 11];
    expected[..2].copy_from_slice(&[1, 2]);
    expected[10] = 3;
    assert_eq!(
        cmds[1],
        BufferUpdateMappedData {
            buffer: buffer.id(),
            offset: 10,
            size: 11,
            data: expected,
        }
        .into()
    );
    assert_eq!(cmds[2], BufferUnmap { buffer: buffer.id() }.into());
    assert!(matches!(
        client.buffer_write_mapped(buffer, 0, &[1]),
        Err(ClientError::InvalidMapState { .. })
    ));
}

#[test]
fn unmap_aborts_a_pending_map() {
    let (mut client, out) = client();
    let opened = open_device(&mut client, &out);
    let buffer = client
        .device_create_buffer(
            opened.device,
            &BufferDescriptor {
                label: None,
                size: 8,
                usage: BufferUsages::MAP_READ,
                mapped_at_creation: false,
            },
        )
        .unwrap();
    let (results, cb) = slot::<MapResponse>();
    let FutureId(request_id) = client.buffer_map_async(buffer, MapMode::READ, 0, 8, cb).unwrap();
    client.buffer_unmap(buffer).unwrap();
    assert_eq!(results.lock().unwrap()[0].status, MapAsyncStatus::Aborted);

    // The server's late answer is ignored.
    deliver(
        &mut client,
        vec![BufferMapAsyncCallback {
            buffer: buffer.id(),
            request_id,
            status: MapAsyncStatus::Aborted,
            message: String::new(),
            read_data: Vec::new(),
        }
        .into()],
    )
    .unwrap();
    assert_eq!(results.lock().unwrap().len(), 1);
    assert!(!client.is_disconnected());
}

#[test]
fn disconnect_resolves_every_pending_call_once() {
    let (mut client, out) = client();
    let opened = open_device(&mut client, &out);
    let (work, cb) = slot::<WorkDoneStatus>();
    client.queue_on_submitted_work_done(opened.queue, cb).unwrap();
    let (scope, cb) = slot::<ErrorScopeResponse>();
    client.device_pop_error_scope(opened.device, cb).unwrap();
    let (adapter, cb) = slot::<AdapterResponse>();
    client.request_adapter(&RequestAdapterOptions::default(), cb).unwrap();

    client.disconnect();
    client.disconnect();

    assert_eq!(*work.lock().unwrap(), vec![WorkDoneStatus::Disconnected]);
    assert_eq!(scope.lock().unwrap()[0].status, PopErrorScopeStatus::Disconnected);
    assert_eq!(adapter.lock().unwrap()[0].status, RequestStatus::Disconnected);
    assert_eq!(client.pending_count(), 0);
    assert_eq!(
        *opened.lost.lock().unwrap(),
        vec![(DeviceLostReason::Disconnected, "the wire is disconnected".to_owned())]
    );

    assert_eq!(
        client.device_create_command_encoder(opened.device, None),
        Err(ClientError::Disconnected)
    );
    let (late, cb) = slot::<WorkDoneStatus>();
    client.queue_on_submitted_work_done(opened.queue, cb).unwrap();
    assert_eq!(*late.lock().unwrap(), vec![WorkDoneStatus::Disconnected]);

    // Releasing after a disconnect only frees the local id.
    client.release(opened.queue).unwrap();
    assert_eq!(client.live_objects(ObjectType::Queue), 0);
}

#[test]
fn device_loss_fails_dependent_calls() {
    let (mut client, out) = client();
    let opened = open_device(&mut client, &out);
    let (work, cb) = slot::<WorkDoneStatus>();
    client.queue_on_submitted_work_done(opened.queue, cb).unwrap();
    sent(&mut client, &out);

    let lost: Return = DeviceLost {
        device: opened.device.id(),
        reason: DeviceLostReason::Destroyed,
        message: "gone".into(),
    }
    .into();
    deliver(&mut client, vec![lost.clone(), lost]).unwrap();

    assert_eq!(*work.lock().unwrap(), vec![WorkDoneStatus::DeviceLost]);
    assert_eq!(
        *opened.lost.lock().unwrap(),
        vec![(DeviceLostReason::Destroyed, "gone".to_owned())]
    );

    let (late, cb) = slot::<ErrorScopeResponse>();
    client.device_pop_error_scope(opened.device, cb).unwrap();
    assert_eq!(late.lock().unwrap()[0].status, PopErrorScopeStatus::DeviceLost);
}

#[test]
fn returns_for_unknown_requests_are_ignored() {
    let (mut client, _out) = client();
    deliver(
        &mut client,
        vec![QueueWorkDoneCallback {
            request_id: 42,
            status: WorkDoneStatus::Success,
        }
        .into()],
    )
    .unwrap();
    assert!(!client.is_disconnected());
}

#[test]
fn mismatched_reply_disconnects() {
    let (mut client, _out) = client();
    let (adapter, cb) = slot::<AdapterResponse>();
    client.request_adapter(&RequestAdapterOptions::default(), cb).unwrap();

    let err = deliver(
        &mut client,
        vec![QueueWorkDoneCallback {
            request_id: 1,
            status: WorkDoneStatus::Success,
        }
        .into()],
    )
    .unwrap_err();
    assert!(matches!(err, FatalError::MismatchedReply { request_id: 1, .. }));
    assert!(client.is_disconnected());
    assert_eq!(adapter.lock().unwrap()[0].status, RequestStatus::Disconnected);
}

#[test]
fn malformed_returns_disconnect() {
    let (mut client, _out) = client();
    let err = client.handle_commands(&[1, 0, 0, 0]).unwrap_err();
    assert!(matches!(err, FatalError::Decode(_)));
    assert!(client.is_disconnected());
    assert_eq!(client.handle_commands(&[]), Err(FatalError::ConnectionSevered));
}

#[test]
fn severed_transport_disconnects_on_flush() {
    let (mut client, out) = client();
    let (adapter, cb) = slot::<AdapterResponse>();
    client.request_adapter(&RequestAdapterOptions::default(), cb).unwrap();
    out.sever();
    assert_eq!(client.flush(), Err(ClientError::Disconnected));
    assert!(client.is_disconnected());
    assert_eq!(adapter.lock().unwrap()[0].status, RequestStatus::Disconnected);
}

#[test]
fn transport_refusal_resolves_the_call_that_hit_it() {
    let (a, _b) = loopback_pair(4096);
    let limits = TransportLimits {
        max_message_bytes: 1 << 12,
        chunk_size: 16,
    };
    let serializer = ChunkedSerializer::new(a.clone(), limits);
    let mut client = WireClient::new(Box::new(serializer), &WireConfig::default());

    let (first, cb) = slot::<AdapterResponse>();
    let first_id = client.request_adapter(&RequestAdapterOptions::default(), cb).unwrap();
    a.close();

    // Staged bytes overflow the chunk, so this call triggers the refused send.
    let (second, cb) = slot::<AdapterResponse>();
    let second_id = client.request_adapter(&RequestAdapterOptions::default(), cb).unwrap();
    assert_ne!(first_id, second_id);

    assert!(client.is_disconnected());
    assert_eq!(client.pending_count(), 0);
    assert_eq!(client.live_objects(ObjectType::Adapter), 0);
    for slot in [&first, &second] {
        let responses = slot.lock().unwrap();
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].status, RequestStatus::Disconnected);
        assert_eq!(responses[0].adapter, None);
    }
}

#[test]
fn oversized_commands_are_rejected_without_side_effects() {
    let (mut client, out) = client();
    let opened = open_device(&mut client, &out);
    let code = "x".repeat(1 << 17);
    let err = client
        .device_create_shader_module(opened.device, &ShaderModuleDescriptor { label: None, code })
        .unwrap_err();
    assert!(matches!(err, ClientError::CommandTooLarge { max: 65536, .. }));
    assert_eq!(client.live_objects(ObjectType::ShaderModule), 0);
    assert!(!client.is_disconnected());
    assert_eq!(sent(&mut client, &out), vec![]);
}

#[test]
fn unknown_handles_are_rejected() {
    let (mut client, _out) = client();
    let ghost = Device::from_id(ObjectId::new(3, 0));
    assert_eq!(
        client.device_push_error_scope(ghost, ErrorFilter::Validation),
        Err(ClientError::UnknownObject {
            object_type: ObjectType::Device,
            id: ObjectId::new(3, 0),
        })
    );
}
