//! AMQP frame codec built on a length delimited codec

use std::collections::VecDeque;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use serde_amqp::{de::Deserializer, read::IoReader, ser::Serializer, value::Value};
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

use super::{
    Error, Frame, FrameBody, FrameCodec, FRAME_HEADER_SIZE, FRAME_TYPE_AMQP, MIN_MAX_FRAME_SIZE,
};

/// Size of the frame size field at the start of every frame
const SIZE_FIELD_LEN: usize = 4;

/// Frames that passed header validation but whose body has not been decoded yet
#[derive(Debug)]
struct RawFrame {
    channel: u16,
    body: BytesMut,
}

/// Default [`FrameCodec`] implementation.
///
/// The frame size field is handled by [`LengthDelimitedCodec`], the performative is encoded and
/// decoded with `serde_amqp`. Extended frame headers are skipped on receipt and never produced.
#[derive(Debug)]
pub struct AmqpFrameCodec {
    framing: LengthDelimitedCodec,
    max_frame_size: u32,
    read_buf: BytesMut,
    frames: VecDeque<RawFrame>,
}

impl Default for AmqpFrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

fn length_delimited(max_frame_size: u32) -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .big_endian()
        .length_field_length(SIZE_FIELD_LEN)
        .max_frame_length(max_frame_length(max_frame_size))
        .length_adjustment(-(SIZE_FIELD_LEN as isize))
        .new_codec()
}

/// The length delimited codec only counts the octets after the size field
fn max_frame_length(max_frame_size: u32) -> usize {
    (max_frame_size as usize).saturating_sub(SIZE_FIELD_LEN)
}

fn write_header(dst: &mut BytesMut, channel: u16) {
    // Extended header is never written, thus doff should always be 2
    dst.put_u8(2); // doff
    dst.put_u8(FRAME_TYPE_AMQP); // frame type
    dst.put_u16(channel);
}

impl AmqpFrameCodec {
    /// Creates a codec without a frame size limit (`u32::MAX`)
    pub fn new() -> Self {
        Self {
            framing: length_delimited(u32::MAX),
            max_frame_size: u32::MAX,
            read_buf: BytesMut::new(),
            frames: VecDeque::new(),
        }
    }

    /// Creates a codec with the given max-frame-size
    pub fn with_max_frame_size(max_frame_size: u32) -> Result<Self, Error> {
        let mut codec = Self::new();
        codec.set_max_frame_size(max_frame_size)?;
        Ok(codec)
    }

    fn frame(&mut self, body: BytesMut) -> Result<Bytes, Error> {
        let mut dst = BytesMut::with_capacity(SIZE_FIELD_LEN + body.len());
        self.framing.encode(body.freeze(), &mut dst)?;
        Ok(dst.freeze())
    }
}

impl FrameCodec for AmqpFrameCodec {
    fn max_frame_size(&self) -> u32 {
        self.max_frame_size
    }

    fn set_max_frame_size(&mut self, max_frame_size: u32) -> Result<(), Error> {
        if max_frame_size < MIN_MAX_FRAME_SIZE {
            return Err(Error::MaxFrameSizeTooSmall(max_frame_size));
        }
        self.framing
            .set_max_frame_length(max_frame_length(max_frame_size));
        self.max_frame_size = max_frame_size;
        Ok(())
    }

    fn receive_bytes(&mut self, src: &[u8]) -> Result<(), Error> {
        self.read_buf.extend_from_slice(src);

        while let Some(mut frame) = self.framing.decode(&mut self.read_buf)? {
            if frame.len() + SIZE_FIELD_LEN < FRAME_HEADER_SIZE {
                return Err(Error::FrameTooSmall(frame.len() + SIZE_FIELD_LEN));
            }

            let doff = frame.get_u8();
            let ftype = frame.get_u8();
            let channel = frame.get_u16();

            // doff counts 4-octet words from the start of the frame
            let body_offset = doff as usize * 4;
            if doff < 2 || body_offset > frame.len() + FRAME_HEADER_SIZE {
                return Err(Error::InvalidDataOffset(doff));
            }
            if ftype != FRAME_TYPE_AMQP {
                return Err(Error::UnsupportedFrameType(ftype));
            }

            frame.advance(body_offset - FRAME_HEADER_SIZE);
            self.frames.push_back(RawFrame {
                channel,
                body: frame,
            });
        }

        Ok(())
    }

    fn decode_frame(&mut self) -> Result<Option<Frame>, Error> {
        let RawFrame { channel, mut body } = match self.frames.pop_front() {
            Some(frame) => frame,
            None => return Ok(None),
        };

        if body.is_empty() {
            return Ok(Some(Frame::empty(channel)));
        }

        let performative = {
            let reader = IoReader::new((&mut body).reader());
            let mut deserializer = Deserializer::new(reader);
            let value: Value = Deserialize::deserialize(&mut deserializer)?;
            match value {
                Value::Null => None,
                value => Some(value),
            }
        };

        // Whatever follows the performative is the payload
        let payload = body.freeze();
        Ok(Some(Frame {
            channel,
            body: FrameBody::Performative {
                performative,
                payload,
            },
        }))
    }

    fn encode_frame<P>(
        &mut self,
        channel: u16,
        performative: &P,
        payloads: &[Bytes],
    ) -> Result<Bytes, Error>
    where
        P: Serialize + ?Sized,
    {
        let payload_size: usize = payloads.iter().map(Bytes::len).sum();
        let mut body = BytesMut::with_capacity(FRAME_HEADER_SIZE + payload_size);
        write_header(&mut body, channel);

        {
            let mut serializer = Serializer::from((&mut body).writer());
            performative.serialize(&mut serializer)?;
        }

        for payload in payloads {
            body.put(&payload[..]);
        }
        self.frame(body)
    }

    fn encode_empty_frame(&mut self) -> Result<Bytes, Error> {
        let mut body = BytesMut::with_capacity(FRAME_HEADER_SIZE);
        write_header(&mut body, 0);
        self.frame(body)
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use fe2o3_amqp_types::performatives::{Close, Open};

    use super::AmqpFrameCodec;
    use crate::frames::{Error, FrameBody, FrameCodec};

    fn open() -> Open {
        Open {
            container_id: "1234".into(),
            hostname: None,
            max_frame_size: 1024u32.into(),
            channel_max: 3u16.into(),
            idle_time_out: None,
            outgoing_locales: None,
            incoming_locales: None,
            offered_capabilities: None,
            desired_capabilities: None,
            properties: None,
        }
    }

    #[test]
    fn test_encoding_empty_frame() {
        let mut codec = AmqpFrameCodec::new();
        let bytes = codec.encode_empty_frame().unwrap();
        assert_eq!(&bytes[..], &[0x00, 0x00, 0x00, 0x08, 0x02, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn test_decode_empty_frame() {
        let mut codec = AmqpFrameCodec::new();
        codec
            .receive_bytes(&[0x00, 0x00, 0x00, 0x08, 0x02, 0x00, 0x00, 0x05])
            .unwrap();
        let frame = codec.decode_frame().unwrap().unwrap();
        assert_eq!(frame.channel, 5);
        assert_eq!(frame.body, FrameBody::Empty);
        assert!(codec.decode_frame().unwrap().is_none());
    }

    #[test]
    fn frame_split_across_chunks() {
        let mut encoder = AmqpFrameCodec::new();
        let bytes = encoder.encode_frame(0, &open(), &[]).unwrap();

        let mut decoder = AmqpFrameCodec::new();
        let (head, tail) = bytes.split_at(5);
        decoder.receive_bytes(head).unwrap();
        assert!(decoder.decode_frame().unwrap().is_none());
        decoder.receive_bytes(tail).unwrap();

        let frame = decoder.decode_frame().unwrap().unwrap();
        assert_eq!(frame.channel, 0);
        match frame.body {
            FrameBody::Performative {
                performative,
                payload,
            } => {
                assert!(performative.is_some());
                assert!(payload.is_empty());
            }
            FrameBody::Empty => panic!("expecting a performative"),
        }
    }

    #[test]
    fn payload_follows_performative() {
        let mut codec = AmqpFrameCodec::new();
        let payloads = [Bytes::from_static(b"hello "), Bytes::from_static(b"world")];
        let bytes = codec
            .encode_frame(7, &Close { error: None }, &payloads)
            .unwrap();

        codec.receive_bytes(&bytes).unwrap();
        let frame = codec.decode_frame().unwrap().unwrap();
        assert_eq!(frame.channel, 7);
        match frame.body {
            FrameBody::Performative { payload, .. } => assert_eq!(&payload[..], b"hello world"),
            FrameBody::Empty => panic!("expecting a performative"),
        }
    }

    #[test]
    fn null_body_decodes_to_none() {
        let mut codec = AmqpFrameCodec::new();
        // size = 9, doff = 2, type = 0, channel = 0, body = null
        codec
            .receive_bytes(&[0x00, 0x00, 0x00, 0x09, 0x02, 0x00, 0x00, 0x00, 0x40])
            .unwrap();
        let frame = codec.decode_frame().unwrap().unwrap();
        assert_eq!(
            frame.body,
            FrameBody::Performative {
                performative: None,
                payload: Bytes::new()
            }
        );
    }

    #[test]
    fn extended_header_is_skipped() {
        let mut codec = AmqpFrameCodec::new();
        // doff = 3 adds four octets of extended header
        codec
            .receive_bytes(&[
                0x00, 0x00, 0x00, 0x0c, 0x03, 0x00, 0x00, 0x01, 0xde, 0xad, 0xbe, 0xef,
            ])
            .unwrap();
        let frame = codec.decode_frame().unwrap().unwrap();
        assert_eq!(frame.channel, 1);
        assert_eq!(frame.body, FrameBody::Empty);
    }

    #[test]
    fn invalid_data_offset_is_rejected() {
        let mut codec = AmqpFrameCodec::new();
        let result = codec.receive_bytes(&[0x00, 0x00, 0x00, 0x08, 0x01, 0x00, 0x00, 0x00]);
        assert!(matches!(result, Err(Error::InvalidDataOffset(1))));
    }

    #[test]
    fn sasl_frame_is_rejected() {
        let mut codec = AmqpFrameCodec::new();
        let result = codec.receive_bytes(&[0x00, 0x00, 0x00, 0x08, 0x02, 0x01, 0x00, 0x00]);
        assert!(matches!(result, Err(Error::UnsupportedFrameType(0x01))));
    }

    #[test]
    fn oversized_frame_is_rejected() {
        let mut codec = AmqpFrameCodec::with_max_frame_size(512).unwrap();
        let result = codec.receive_bytes(&[0x00, 0x00, 0x02, 0x01]);
        assert!(matches!(result, Err(Error::Io(_))));
    }

    #[test]
    fn max_frame_size_below_minimum_is_rejected() {
        let mut codec = AmqpFrameCodec::new();
        assert!(matches!(
            codec.set_max_frame_size(511),
            Err(Error::MaxFrameSizeTooSmall(511))
        ));
        assert_eq!(codec.max_frame_size(), u32::MAX);
    }

    #[test]
    fn garbage_body_is_a_decode_error() {
        let mut codec = AmqpFrameCodec::new();
        // 0xff is not a valid format code
        codec
            .receive_bytes(&[0x00, 0x00, 0x00, 0x09, 0x02, 0x00, 0x00, 0x00, 0xff])
            .unwrap();
        assert!(matches!(codec.decode_frame(), Err(Error::Serde(_))));
    }
}
