// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
};

use frond::{
    chanrpc::{Args, Function, Server},
    codec::{BinaryProcessor, CodecError, JsonProcessor, Processor, UserData, msg_id},
};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
struct Chat {
    text: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
struct Ping {
    seq: u32,
}

fn dummy_user_data() -> UserData {
    Arc::new(17u8)
}

#[test]
fn json_marshal_produces_named_envelope() {
    let mut p = JsonProcessor::new();
    p.register::<Chat>();

    let parts = p
        .marshal(&Chat {
            text: "hi".to_string(),
        })
        .unwrap();
    assert_eq!(parts.len(), 1);

    let v: serde_json::Value = serde_json::from_slice(&parts[0]).unwrap();
    assert_eq!(v, serde_json::json!({ "Chat": { "text": "hi" } }));
}

#[test]
fn json_round_trip() {
    let mut p = JsonProcessor::new();
    p.register::<Chat>();

    let msg = Chat {
        text: "round".to_string(),
    };
    let parts = p.marshal(&msg).unwrap();
    let back = p.unmarshal(&parts[0]).unwrap();
    assert_eq!(back.downcast_ref::<Chat>(), Some(&msg));
}

#[test]
fn json_envelope_shape_is_enforced() {
    let mut p = JsonProcessor::new();
    p.register::<Chat>();

    assert!(matches!(
        p.unmarshal(br#"{"Chat":{"text":"a"},"Ping":{"seq":1}}"#),
        Err(CodecError::Malformed(_))
    ));
    assert!(matches!(
        p.unmarshal(br#"[1,2,3]"#),
        Err(CodecError::Malformed(_))
    ));
    assert!(matches!(
        p.unmarshal(br#"{"Nope":{}}"#),
        Err(CodecError::NotRegistered(_))
    ));
    assert!(matches!(
        p.unmarshal(br#"{"Chat":{"text":12}}"#),
        Err(CodecError::Malformed(_))
    ));
}

#[tokio::test]
async fn json_routes_to_handler_and_router() {
    let mut p = JsonProcessor::new();
    p.register::<Chat>();

    // In-thread handler.
    let handled = Arc::new(Mutex::new(Vec::new()));
    let h = handled.clone();
    p.set_handler::<Chat>(move |args: Args| {
        let chat = args[0].downcast_ref::<Chat>().unwrap();
        h.lock().unwrap().push(chat.text.clone());
    });

    // Cross-thread router.
    let mut server: Server<()> = Server::new(8);
    let routed = Arc::new(AtomicUsize::new(0));
    let r = routed.clone();
    server.register(
        msg_id::<Chat>(),
        Function::no_ret(move |_, args: Args| {
            assert!(args[0].downcast_ref::<Chat>().is_some());
            r.fetch_add(1, Ordering::SeqCst);
        }),
    );
    p.set_router::<Chat>(server.sender());

    let msg = Box::new(Chat {
        text: "both".to_string(),
    });
    p.route(msg, dummy_user_data()).unwrap();

    // Handler ran inline; the router call sits in the server queue.
    assert_eq!(handled.lock().unwrap().as_slice(), &["both".to_string()]);
    let ci = server.recv().await.unwrap();
    server.exec(&mut (), ci).await;
    assert_eq!(routed.load(Ordering::SeqCst), 1);
}

#[test]
fn binary_tags_follow_registration_order() {
    let mut p = BinaryProcessor::new(false);
    p.register::<Chat>();
    p.register::<Ping>();

    assert_eq!(p.tag_of::<Chat>(), Some(0));
    assert_eq!(p.tag_of::<Ping>(), Some(1));

    let parts = p.marshal(&Ping { seq: 9 }).unwrap();
    assert_eq!(parts.len(), 2);
    assert_eq!(&parts[0][..], &[0, 1][..]);
}

#[test]
fn binary_round_trip_both_orders() {
    for le in [false, true] {
        let mut p = BinaryProcessor::new(le);
        p.register::<Chat>();
        p.register::<Ping>();

        let msg = Ping { seq: 77 };
        let parts = p.marshal(&msg).unwrap();
        let mut wire = parts[0].to_vec();
        wire.extend_from_slice(&parts[1]);

        let back = p.unmarshal(&wire).unwrap();
        assert_eq!(back.downcast_ref::<Ping>(), Some(&msg));
    }
}

#[test]
fn binary_rejects_unknown_and_short_input() {
    let mut p = BinaryProcessor::new(false);
    p.register::<Chat>();

    assert!(matches!(
        p.unmarshal(&[0, 7, 1, 2, 3]),
        Err(CodecError::UnknownTag(7))
    ));
    assert!(matches!(
        p.unmarshal(&[0]),
        Err(CodecError::Malformed(_))
    ));
}

#[test]
#[should_panic(expected = "already registered")]
fn json_duplicate_registration_panics() {
    let mut p = JsonProcessor::new();
    p.register::<Chat>();
    p.register::<Chat>();
}
