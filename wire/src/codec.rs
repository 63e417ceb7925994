use std::io::{Read, Write};

use byteorder::{BigEndian, ByteOrder};

use crate::{Error, Message, HEADER_SIZE, MAX_MESSAGE_SIZE};

/// Read one raw frame: the 5-byte header plus exactly the announced payload.
///
/// Returns the type byte and the payload. The caller gets the bytes before
/// any interpretation so handshake transcripts can hash exactly what was on
/// the wire.
pub fn read_frame<R: Read>(stream: &mut R) -> Result<(u8, Vec<u8>), Error> {
    let mut header = [0u8; HEADER_SIZE];
    stream.read_exact(&mut header)?;

    let msg_type = header[0];
    let len = BigEndian::read_u32(&header[1..]) as usize;
    if len > MAX_MESSAGE_SIZE {
        return Err(Error::MessageTooLarge(len));
    }

    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload)?;
    Ok((msg_type, payload))
}

/// Read and decode the next message from the stream.
pub fn read_message<R: Read>(stream: &mut R) -> Result<Message, Error> {
    let (msg_type, payload) = read_frame(stream)?;
    Message::decode(msg_type, &payload)
}

/// Encode and write a message. The payload length is validated before any
/// byte hits the stream so an oversized message never leaves a half-written
/// frame behind.
pub fn write_message<W: Write>(stream: &mut W, msg: &Message) -> Result<(), Error> {
    let encoded = msg.encode();
    if encoded.len() - HEADER_SIZE > MAX_MESSAGE_SIZE {
        return Err(Error::MessageTooLarge(encoded.len() - HEADER_SIZE));
    }
    stream.write_all(&encoded)?;
    stream.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn frame_round_trip() {
        let msg = Message::Data {
            seq: 7,
            ciphertext: vec![0xee; 40],
        };
        let mut buf = Vec::new();
        write_message(&mut buf, &msg).unwrap();

        let mut cursor = Cursor::new(buf);
        assert_eq!(read_message(&mut cursor).unwrap(), msg);
    }

    #[test]
    fn oversize_length_rejected_before_body_read() {
        let mut frame = vec![0x10];
        frame.extend_from_slice(&(MAX_MESSAGE_SIZE as u32 + 1).to_be_bytes());
        let mut cursor = Cursor::new(frame);
        assert!(matches!(
            read_message(&mut cursor),
            Err(Error::MessageTooLarge(_))
        ));
    }

    #[test]
    fn short_read_is_io_error() {
        let msg = Message::Ping.encode();
        let mut cursor = Cursor::new(&msg[..3]);
        assert!(matches!(read_message(&mut cursor), Err(Error::Io(_))));
    }

    #[test]
    fn oversize_write_rejected() {
        let msg = Message::Data {
            seq: 0,
            ciphertext: vec![0; MAX_MESSAGE_SIZE],
        };
        let mut buf = Vec::new();
        assert!(matches!(
            write_message(&mut buf, &msg),
            Err(Error::MessageTooLarge(_))
        ));
        assert!(buf.is_empty());
    }
}
