//! Frame decoder vector tests.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use draftws_core::protocol::frame::{Decoded, FrameDecoder};
use draftws_core::DraftWsError;

use vector_loader::load;

struct Outcome {
    messages: Vec<String>,
    closed: bool,
    error: Option<DraftWsError>,
}

fn drain(dec: &mut FrameDecoder, out: &mut Outcome) {
    loop {
        match dec.next_frame() {
            Ok(Some(Decoded::Message(m))) => out.messages.push(m),
            Ok(Some(Decoded::Close)) => out.closed = true,
            Ok(None) => break,
            Err(e) => {
                out.error = Some(e);
                break;
            }
        }
    }
}

/// Feed in one chunk, and again one byte at a time; both must agree.
fn run(raw: &[u8]) -> Outcome {
    let mut whole = Outcome { messages: vec![], closed: false, error: None };
    let mut dec = FrameDecoder::default();
    dec.extend(raw);
    drain(&mut dec, &mut whole);

    let mut bytewise = Outcome { messages: vec![], closed: false, error: None };
    let mut dec = FrameDecoder::default();
    for b in raw {
        if bytewise.error.is_some() {
            break;
        }
        dec.extend(std::slice::from_ref(b));
        drain(&mut dec, &mut bytewise);
    }

    assert_eq!(whole.messages, bytewise.messages);
    assert_eq!(whole.closed, bytewise.closed);
    assert_eq!(whole.error.is_some(), bytewise.error.is_some());
    whole
}

#[test]
fn frame_vectors() {
    let files = [
        "frame_two_messages.json",
        "frame_utf8.json",
        "frame_inner_nul.json",
        "frame_close.json",
        "frame_unmarked_payload.json",
        "frame_bad_utf8.json",
        "frame_lone_end.json",
    ];

    for f in files {
        let v = load(f);
        let out = run(&v.frame.decode());

        if let Some(err) = v.expect_error {
            let e = out.error.expect("expected error");
            assert_eq!(e.kind().as_str(), err.code, "vector={}", v.description);
            continue;
        }

        assert!(out.error.is_none(), "vector={} error={:?}", v.description, out.error);
        let ex = v.expect.expect("missing expect block");
        let messages: Vec<String> = ex["messages"]
            .as_array()
            .unwrap()
            .iter()
            .map(|m| m.as_str().unwrap().to_string())
            .collect();
        assert_eq!(out.messages, messages, "vector={}", v.description);
        assert_eq!(out.closed, ex["closed"].as_bool().unwrap(), "vector={}", v.description);
    }
}
