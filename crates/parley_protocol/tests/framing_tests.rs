use bytes::BytesMut;
use parley_protocol::wire::{self, Envelope, envelope::Msg};
use parley_protocol::{DEFAULT_MAX_FRAME_SIZE, FramingError, encode_frame, encode_frame_into, try_decode_frame};

fn chat_envelope(text: &str) -> Envelope {
	Envelope::new(Msg::Chat(wire::Chat {
		user_id: "alice".to_string(),
		msg: text.to_string(),
		dm: false,
	}))
}

#[test]
fn streamed_frames_decode_one_at_a_time() {
	let first = chat_envelope("one");
	let second = chat_envelope("two");

	let mut buf = BytesMut::new();
	encode_frame_into(&mut buf, &first, DEFAULT_MAX_FRAME_SIZE).expect("encode first");
	encode_frame_into(&mut buf, &second, DEFAULT_MAX_FRAME_SIZE).expect("encode second");

	let a = try_decode_frame::<Envelope>(&mut buf, DEFAULT_MAX_FRAME_SIZE)
		.expect("ok")
		.expect("first frame");
	assert_eq!(a, first);

	let b = try_decode_frame::<Envelope>(&mut buf, DEFAULT_MAX_FRAME_SIZE)
		.expect("ok")
		.expect("second frame");
	assert_eq!(b, second);

	assert!(buf.is_empty());
	assert!(
		try_decode_frame::<Envelope>(&mut buf, DEFAULT_MAX_FRAME_SIZE)
			.expect("ok")
			.is_none()
	);
}

#[test]
fn split_reads_reassemble() {
	let env = chat_envelope("fragmented across reads");
	let frame = encode_frame(&env, DEFAULT_MAX_FRAME_SIZE).expect("encode");

	let mut buf = BytesMut::new();
	for chunk in frame.chunks(3) {
		assert!(
			try_decode_frame::<Envelope>(&mut buf, DEFAULT_MAX_FRAME_SIZE)
				.expect("ok")
				.is_none()
		);
		buf.extend_from_slice(chunk);
	}

	let decoded = try_decode_frame::<Envelope>(&mut buf, DEFAULT_MAX_FRAME_SIZE)
		.expect("ok")
		.expect("reassembled frame");
	assert_eq!(decoded, env);
}

#[test]
fn oversized_frames_are_rejected_on_both_sides() {
	let env = chat_envelope(&"a".repeat(4096));

	let err = encode_frame(&env, 64).unwrap_err();
	assert!(matches!(err, FramingError::FrameTooLarge { .. }));

	let mut buf = BytesMut::new();
	buf.extend_from_slice(&(65_u32).to_be_bytes());
	let err = try_decode_frame::<Envelope>(&mut buf, 64).unwrap_err();
	assert!(matches!(err, FramingError::FrameTooLarge { .. }));
}

#[test]
fn empty_envelope_is_legal_on_the_wire() {
	let env = Envelope {
		version: wire::PROTOCOL_VERSION,
		msg: None,
	};

	let frame = encode_frame(&env, DEFAULT_MAX_FRAME_SIZE).expect("encode");
	let mut buf = BytesMut::from(&frame[..]);
	let decoded = try_decode_frame::<Envelope>(&mut buf, DEFAULT_MAX_FRAME_SIZE)
		.expect("ok")
		.expect("some");

	assert_eq!(decoded.version, wire::PROTOCOL_VERSION);
	assert!(decoded.msg.is_none());
}
