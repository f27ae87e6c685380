use bytes::Bytes;

/// Kind byte of a transport frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameKind {
    Data = 0x01,
    Ping = 0x02,
    Pong = 0x03,
    Close = 0x04,
}

impl TryFrom<u8> for FrameKind {
    type Error = u8;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0x01 => Ok(FrameKind::Data),
            0x02 => Ok(FrameKind::Ping),
            0x03 => Ok(FrameKind::Pong),
            0x04 => Ok(FrameKind::Close),
            other => Err(other),
        }
    }
}

/// One frame exchanged with a gateway
///
/// Data frames carry formatter-encoded messages. Ping and pong frames carry
/// an opaque payload that the pong echoes; close frames carry a UTF-8 reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireFrame {
    Data(Bytes),
    Ping(Bytes),
    Pong(Bytes),
    Close(String),
}

impl WireFrame {
    pub fn kind(&self) -> FrameKind {
        match self {
            WireFrame::Data(_) => FrameKind::Data,
            WireFrame::Ping(_) => FrameKind::Ping,
            WireFrame::Pong(_) => FrameKind::Pong,
            WireFrame::Close(_) => FrameKind::Close,
        }
    }

    /// Frame body without the kind byte
    pub fn body(&self) -> &[u8] {
        match self {
            WireFrame::Data(body) | WireFrame::Ping(body) | WireFrame::Pong(body) => body,
            WireFrame::Close(reason) => reason.as_bytes(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_bytes() {
        assert_eq!(FrameKind::try_from(0x03), Ok(FrameKind::Pong));
        assert_eq!(FrameKind::try_from(0x09), Err(0x09));
        assert_eq!(WireFrame::Close("bye".into()).kind() as u8, 0x04);
        assert_eq!(WireFrame::Close("bye".into()).body(), b"bye");
    }
}
