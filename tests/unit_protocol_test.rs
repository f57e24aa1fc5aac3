use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use palisade::config::SslMode;
use palisade::core::db::ConnInfo;
use palisade::core::errors::{MonitorErrorClass, classify_monitor_code};
use palisade::core::monitor::protocol::{Frame, FrameCodec, split_error_frame};

fn round_trip(frame: Frame) -> Frame {
    let mut codec = FrameCodec;
    let mut buf = BytesMut::new();
    codec.encode(frame, &mut buf).unwrap();
    let decoded = codec.decode(&mut buf).unwrap().unwrap();
    assert!(buf.is_empty(), "decoder left {} bytes behind", buf.len());
    decoded
}

#[test]
fn test_simple_frames_round_trip() {
    assert_eq!(
        round_trip(Frame::SimpleString("OK".into())),
        Frame::SimpleString("OK".into())
    );
    assert_eq!(round_trip(Frame::Integer(-42)), Frame::Integer(-42));
    assert_eq!(round_trip(Frame::Null), Frame::Null);
    assert_eq!(
        round_trip(Frame::BulkString("16/B374D848".into())),
        Frame::BulkString("16/B374D848".into())
    );
    assert_eq!(
        round_trip(Frame::Error("40001 restart the transaction".into())),
        Frame::Error("40001 restart the transaction".into())
    );
}

#[test]
fn test_nested_arrays_round_trip() {
    let row = Frame::Array(vec![
        Frame::Integer(1),
        Frame::bulk("node_a"),
        Frame::Array(vec![Frame::bulk("10.0.0.2"), Frame::Integer(5432)]),
        Frame::Null,
    ]);
    assert_eq!(round_trip(row.clone()), row);
}

#[test]
fn test_call_frame_shape() {
    let frame = Frame::call("node_active", [Frame::bulk("default"), Frame::Integer(1)]);
    let Frame::Array(parts) = &frame else {
        panic!("call() must build an array");
    };
    assert_eq!(parts.len(), 3);
    assert_eq!(parts[0].as_text().unwrap(), "node_active");
}

#[test]
fn test_partial_input_decodes_to_none() {
    let mut codec = FrameCodec;
    let mut buf = BytesMut::new();
    codec
        .encode(Frame::bulk("a longer payload"), &mut buf)
        .unwrap();

    let mut partial = BytesMut::from(&buf[..buf.len() - 4]);
    assert_eq!(codec.decode(&mut partial).unwrap(), None);
}

#[test]
fn test_unknown_tag_byte_is_an_error() {
    let mut codec = FrameCodec;
    let mut buf = BytesMut::from(&b"?what\r\n"[..]);
    assert!(codec.decode(&mut buf).is_err());
}

#[test]
fn test_oversized_array_is_rejected() {
    let mut codec = FrameCodec;
    let mut buf = BytesMut::from(&b"*99999999\r\n"[..]);
    assert!(codec.decode(&mut buf).is_err());
}

#[test]
fn test_frame_accessors() {
    assert_eq!(Frame::Integer(7).as_integer().unwrap(), 7);
    assert_eq!(Frame::bulk("7").as_integer().unwrap(), 7);
    assert!(Frame::bulk("t").as_bool().unwrap());
    assert!(!Frame::bulk("f").as_bool().unwrap());
    assert!(Frame::Integer(1).as_bool().unwrap());
    assert_eq!(Frame::SimpleString("ok".into()).as_text().unwrap(), "ok");
    assert!(Frame::Null.as_text().is_err());
}

#[test]
fn test_error_frames_split_into_code_and_message() {
    let (code, message) = split_error_frame("40001 could not serialize access");
    assert_eq!(code, "40001");
    assert_eq!(message, "could not serialize access");

    let (code, message) = split_error_frame("something went wrong");
    assert_eq!(code, "XX000");
    assert_eq!(message, "something went wrong");
}

#[test]
fn test_monitor_error_classification() {
    for code in ["40001", "40003", "40P01", "53200", "54000"] {
        assert_eq!(
            classify_monitor_code(code),
            MonitorErrorClass::Retryable,
            "{code} must be retryable"
        );
    }
    assert_eq!(
        classify_monitor_code("55006"),
        MonitorErrorClass::ObjectInUse
    );
    assert_eq!(
        classify_monitor_code("23P01"),
        MonitorErrorClass::ExclusionViolation
    );
    assert_eq!(classify_monitor_code("42883"), MonitorErrorClass::Other);
    assert_eq!(classify_monitor_code("XX000"), MonitorErrorClass::Other);
}

#[test]
fn test_conninfo_renders_in_stable_order() {
    let a = ConnInfo::new("10.0.0.2", 5432)
        .user("replicator")
        .application_name("node_b")
        .ssl_mode(SslMode::Require);
    let b = ConnInfo::new("10.0.0.2", 5432)
        .ssl_mode(SslMode::Require)
        .application_name("node_b")
        .user("replicator");
    assert_eq!(a.to_string(), b.to_string());
    assert_eq!(
        a.to_string(),
        "application_name=node_b host=10.0.0.2 port=5432 sslmode=require user=replicator"
    );
}

#[test]
fn test_conninfo_quotes_awkward_values() {
    let conninfo = ConnInfo::new("10.0.0.2", 5432).password("pa ss'word");
    let rendered = conninfo.to_string();
    assert!(rendered.contains("password='pa ss\\'word'"));
}
