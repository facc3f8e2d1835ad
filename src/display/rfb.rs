//! Minimal RFB (VNC) client.
//!
//! Speaks protocol versions 3.3, 3.7 and 3.8 with the None and VNC
//! Authentication security types, requests 32-bit little-endian true-colour
//! pixels and understands the Raw and DesktopSize encodings. That is enough
//! for full-frame screenshots and pointer/key injection.

use des::cipher::{generic_array::GenericArray, BlockEncrypt, KeyInit};
use des::Des;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const SECURITY_INVALID: u8 = 0;
const SECURITY_NONE: u8 = 1;
const SECURITY_VNC_AUTH: u8 = 2;

const ENCODING_RAW: i32 = 0;
const ENCODING_DESKTOP_SIZE: i32 = -223;

const MSG_SET_PIXEL_FORMAT: u8 = 0;
const MSG_SET_ENCODINGS: u8 = 2;
const MSG_FRAMEBUFFER_UPDATE_REQUEST: u8 = 3;
const MSG_KEY_EVENT: u8 = 4;
const MSG_POINTER_EVENT: u8 = 5;

const SERVER_FRAMEBUFFER_UPDATE: u8 = 0;
const SERVER_SET_COLOUR_MAP_ENTRIES: u8 = 1;
const SERVER_BELL: u8 = 2;
const SERVER_CUT_TEXT: u8 = 3;

/// Upper bound on server-supplied string lengths (reason, name, cut text).
const MAX_STRING_LEN: u32 = 1 << 20;

#[derive(Error, Debug)]
pub enum RfbError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("no supported security type offered (server offered {0:?})")]
    UnsupportedSecurity(Vec<u8>),

    #[error("server sent unsupported encoding {0}")]
    UnsupportedEncoding(i32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    V3_3,
    V3_7,
    V3_8,
}

impl Version {
    fn wire(self) -> &'static [u8; 12] {
        match self {
            Version::V3_3 => b"RFB 003.003\n",
            Version::V3_7 => b"RFB 003.007\n",
            Version::V3_8 => b"RFB 003.008\n",
        }
    }

    fn parse(banner: &[u8; 12]) -> Result<Self, RfbError> {
        let text = std::str::from_utf8(banner)
            .map_err(|_| RfbError::Protocol("non-ascii version banner".into()))?;
        let rest = text
            .strip_prefix("RFB ")
            .and_then(|r| r.strip_suffix('\n'))
            .ok_or_else(|| RfbError::Protocol(format!("bad version banner {text:?}")))?;
        let (major, minor) = rest
            .split_once('.')
            .ok_or_else(|| RfbError::Protocol(format!("bad version banner {text:?}")))?;
        let major: u32 = major
            .parse()
            .map_err(|_| RfbError::Protocol(format!("bad major version {major:?}")))?;
        let minor: u32 = minor
            .parse()
            .map_err(|_| RfbError::Protocol(format!("bad minor version {minor:?}")))?;
        Ok(match (major, minor) {
            (3, m) if m < 7 => Version::V3_3,
            (3, 7) => Version::V3_7,
            (3, _) => Version::V3_8,
            (m, _) if m > 3 => Version::V3_8,
            _ => return Err(RfbError::Protocol(format!("unsupported version {major}.{minor}"))),
        })
    }
}

/// Pointer buttons as RFB mask bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Button {
    Left,
    Middle,
    Right,
    WheelUp,
    WheelDown,
    WheelLeft,
    WheelRight,
}

impl Button {
    pub fn mask(self) -> u8 {
        match self {
            Button::Left => 1,
            Button::Middle => 1 << 1,
            Button::Right => 1 << 2,
            Button::WheelUp => 1 << 3,
            Button::WheelDown => 1 << 4,
            Button::WheelLeft => 1 << 5,
            Button::WheelRight => 1 << 6,
        }
    }

    /// X11 button number (1 = left, 2 = middle, 3 = right, 4–7 wheel).
    pub fn from_number(n: u8) -> Option<Self> {
        Some(match n {
            1 => Button::Left,
            2 => Button::Middle,
            3 => Button::Right,
            4 => Button::WheelUp,
            5 => Button::WheelDown,
            6 => Button::WheelLeft,
            7 => Button::WheelRight,
            _ => return None,
        })
    }
}

/// What the last rectangle of a FramebufferUpdate left behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Update {
    Painted,
    /// A DesktopSize rectangle with no pixel data after it.
    Resized,
}

/// A connected RFB session with a local copy of the framebuffer in RGBA.
pub struct RfbClient<S> {
    stream: S,
    width: u16,
    height: u16,
    name: String,
    framebuffer: Vec<u8>,
    pointer: (u16, u16),
    buttons: u8,
}

impl<S> RfbClient<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Run the handshake over an established stream.
    pub async fn handshake(mut stream: S, password: Option<&str>) -> Result<Self, RfbError> {
        let mut banner = [0u8; 12];
        stream.read_exact(&mut banner).await?;
        let version = Version::parse(&banner)?;
        stream.write_all(version.wire()).await?;
        tracing::debug!(?version, "RFB version negotiated");

        let security = negotiate_security(&mut stream, version, password.is_some()).await?;
        if security == SECURITY_VNC_AUTH {
            let mut challenge = [0u8; 16];
            stream.read_exact(&mut challenge).await?;
            let key = password.unwrap_or_default().as_bytes();
            stream.write_all(&vnc_auth_response(key, &challenge)).await?;
        }
        if security == SECURITY_VNC_AUTH || version == Version::V3_8 {
            let status = stream.read_u32().await?;
            if status != 0 {
                let reason = if version == Version::V3_8 {
                    read_string(&mut stream).await.unwrap_or_default()
                } else {
                    String::new()
                };
                return Err(RfbError::AuthFailed(if reason.is_empty() {
                    format!("security result {status}")
                } else {
                    reason
                }));
            }
        }

        // Shared session: don't disconnect other viewers.
        stream.write_all(&[1]).await?;

        let width = stream.read_u16().await?;
        let height = stream.read_u16().await?;
        let mut server_format = [0u8; 16];
        stream.read_exact(&mut server_format).await?;
        let name = read_string(&mut stream).await?;
        tracing::info!(width, height, name = %name, "RFB session established");

        let mut client = Self {
            stream,
            width,
            height,
            name,
            framebuffer: vec![0; usize::from(width) * usize::from(height) * 4],
            pointer: (0, 0),
            buttons: 0,
        };
        client.set_pixel_format().await?;
        client.set_encodings(&[ENCODING_RAW, ENCODING_DESKTOP_SIZE]).await?;
        Ok(client)
    }

    pub fn size(&self) -> (u16, u16) {
        (self.width, self.height)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Request a full frame and wait until it has been applied.
    ///
    /// An update that only resizes the desktop leaves a blank framebuffer, so
    /// the frame is requested again at the new size.
    ///
    /// Returns the framebuffer as tightly packed RGBA rows.
    pub async fn capture(&mut self) -> Result<(u16, u16, Vec<u8>), RfbError> {
        self.request_update(false, 0, 0, self.width, self.height).await?;
        loop {
            let msg = self.stream.read_u8().await?;
            match msg {
                SERVER_FRAMEBUFFER_UPDATE => {
                    if self.read_framebuffer_update().await? == Update::Painted {
                        return Ok((self.width, self.height, self.framebuffer.clone()));
                    }
                    tracing::debug!(
                        width = self.width,
                        height = self.height,
                        "re-requesting frame after resize"
                    );
                    self.request_update(false, 0, 0, self.width, self.height).await?;
                }
                SERVER_SET_COLOUR_MAP_ENTRIES => {
                    let mut header = [0u8; 5];
                    self.stream.read_exact(&mut header).await?;
                    let count = u16::from_be_bytes([header[3], header[4]]);
                    self.skip(usize::from(count) * 6).await?;
                }
                SERVER_BELL => {}
                SERVER_CUT_TEXT => {
                    let mut pad = [0u8; 3];
                    self.stream.read_exact(&mut pad).await?;
                    let len = self.stream.read_u32().await?;
                    if len > MAX_STRING_LEN {
                        return Err(RfbError::Protocol(format!("cut text too long ({len})")));
                    }
                    self.skip(len as usize).await?;
                }
                other => {
                    return Err(RfbError::Protocol(format!("unknown server message {other}")));
                }
            }
        }
    }

    pub async fn pointer_move(&mut self, x: u16, y: u16) -> Result<(), RfbError> {
        self.pointer = (x, y);
        self.send_pointer().await
    }

    pub async fn button_down(&mut self, button: Button) -> Result<(), RfbError> {
        self.buttons |= button.mask();
        self.send_pointer().await
    }

    pub async fn button_up(&mut self, button: Button) -> Result<(), RfbError> {
        self.buttons &= !button.mask();
        self.send_pointer().await
    }

    pub async fn key_event(&mut self, keysym: u32, down: bool) -> Result<(), RfbError> {
        let mut msg = [0u8; 8];
        msg[0] = MSG_KEY_EVENT;
        msg[1] = u8::from(down);
        msg[4..8].copy_from_slice(&keysym.to_be_bytes());
        self.stream.write_all(&msg).await?;
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<(), RfbError> {
        self.stream.shutdown().await?;
        Ok(())
    }

    async fn send_pointer(&mut self) -> Result<(), RfbError> {
        let (x, y) = self.pointer;
        let mut msg = [0u8; 6];
        msg[0] = MSG_POINTER_EVENT;
        msg[1] = self.buttons;
        msg[2..4].copy_from_slice(&x.to_be_bytes());
        msg[4..6].copy_from_slice(&y.to_be_bytes());
        self.stream.write_all(&msg).await?;
        Ok(())
    }

    async fn set_pixel_format(&mut self) -> Result<(), RfbError> {
        let mut msg = [0u8; 20];
        msg[0] = MSG_SET_PIXEL_FORMAT;
        msg[4] = 32; // bits per pixel
        msg[5] = 24; // depth
        msg[6] = 0; // little endian
        msg[7] = 1; // true colour
        msg[8..10].copy_from_slice(&255u16.to_be_bytes());
        msg[10..12].copy_from_slice(&255u16.to_be_bytes());
        msg[12..14].copy_from_slice(&255u16.to_be_bytes());
        msg[14] = 16; // red shift
        msg[15] = 8; // green shift
        msg[16] = 0; // blue shift
        self.stream.write_all(&msg).await?;
        Ok(())
    }

    async fn set_encodings(&mut self, encodings: &[i32]) -> Result<(), RfbError> {
        let mut msg = Vec::with_capacity(4 + encodings.len() * 4);
        msg.push(MSG_SET_ENCODINGS);
        msg.push(0);
        msg.extend_from_slice(&(encodings.len() as u16).to_be_bytes());
        for enc in encodings {
            msg.extend_from_slice(&enc.to_be_bytes());
        }
        self.stream.write_all(&msg).await?;
        Ok(())
    }

    async fn request_update(
        &mut self,
        incremental: bool,
        x: u16,
        y: u16,
        w: u16,
        h: u16,
    ) -> Result<(), RfbError> {
        let mut msg = [0u8; 10];
        msg[0] = MSG_FRAMEBUFFER_UPDATE_REQUEST;
        msg[1] = u8::from(incremental);
        msg[2..4].copy_from_slice(&x.to_be_bytes());
        msg[4..6].copy_from_slice(&y.to_be_bytes());
        msg[6..8].copy_from_slice(&w.to_be_bytes());
        msg[8..10].copy_from_slice(&h.to_be_bytes());
        self.stream.write_all(&msg).await?;
        Ok(())
    }

    async fn read_framebuffer_update(&mut self) -> Result<Update, RfbError> {
        let _pad = self.stream.read_u8().await?;
        let rects = self.stream.read_u16().await?;
        let mut update = Update::Painted;
        for _ in 0..rects {
            let x = self.stream.read_u16().await?;
            let y = self.stream.read_u16().await?;
            let w = self.stream.read_u16().await?;
            let h = self.stream.read_u16().await?;
            let encoding = self.stream.read_i32().await?;
            match encoding {
                ENCODING_RAW => {
                    let mut pixels = vec![0u8; usize::from(w) * usize::from(h) * 4];
                    self.stream.read_exact(&mut pixels).await?;
                    self.blit(x, y, w, h, &pixels);
                    update = Update::Painted;
                }
                ENCODING_DESKTOP_SIZE => {
                    tracing::info!(width = w, height = h, "remote desktop resized");
                    self.width = w;
                    self.height = h;
                    self.framebuffer = vec![0; usize::from(w) * usize::from(h) * 4];
                    update = Update::Resized;
                }
                other => return Err(RfbError::UnsupportedEncoding(other)),
            }
        }
        Ok(update)
    }

    /// Copy a Raw rectangle (BGRX little-endian) into the RGBA framebuffer,
    /// clipping anything outside the screen.
    fn blit(&mut self, x: u16, y: u16, w: u16, h: u16, pixels: &[u8]) {
        let fb_w = usize::from(self.width);
        let fb_h = usize::from(self.height);
        for row in 0..usize::from(h) {
            let dy = usize::from(y) + row;
            if dy >= fb_h {
                break;
            }
            for col in 0..usize::from(w) {
                let dx = usize::from(x) + col;
                if dx >= fb_w {
                    break;
                }
                let src = (row * usize::from(w) + col) * 4;
                let dst = (dy * fb_w + dx) * 4;
                self.framebuffer[dst] = pixels[src + 2];
                self.framebuffer[dst + 1] = pixels[src + 1];
                self.framebuffer[dst + 2] = pixels[src];
                self.framebuffer[dst + 3] = 255;
            }
        }
    }

    async fn skip(&mut self, mut n: usize) -> Result<(), RfbError> {
        let mut buf = [0u8; 4096];
        while n > 0 {
            let chunk = n.min(buf.len());
            self.stream.read_exact(&mut buf[..chunk]).await?;
            n -= chunk;
        }
        Ok(())
    }
}

async fn negotiate_security<S>(
    stream: &mut S,
    version: Version,
    have_password: bool,
) -> Result<u8, RfbError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if version == Version::V3_3 {
        let chosen = stream.read_u32().await?;
        return match u8::try_from(chosen) {
            Ok(SECURITY_INVALID) => {
                let reason = read_string(stream).await.unwrap_or_default();
                Err(RfbError::AuthFailed(reason))
            }
            Ok(t @ (SECURITY_NONE | SECURITY_VNC_AUTH)) => Ok(t),
            _ => Err(RfbError::UnsupportedSecurity(vec![chosen as u8])),
        };
    }

    let count = stream.read_u8().await?;
    if count == 0 {
        let reason = read_string(stream).await.unwrap_or_default();
        return Err(RfbError::AuthFailed(reason));
    }
    let mut offered = vec![0u8; usize::from(count)];
    stream.read_exact(&mut offered).await?;

    let chosen = if have_password && offered.contains(&SECURITY_VNC_AUTH) {
        SECURITY_VNC_AUTH
    } else if offered.contains(&SECURITY_NONE) {
        SECURITY_NONE
    } else if offered.contains(&SECURITY_VNC_AUTH) {
        SECURITY_VNC_AUTH
    } else {
        return Err(RfbError::UnsupportedSecurity(offered));
    };
    stream.write_all(&[chosen]).await?;
    Ok(chosen)
}

async fn read_string<S>(stream: &mut S) -> Result<String, RfbError>
where
    S: AsyncRead + Unpin,
{
    let len = stream.read_u32().await?;
    if len > MAX_STRING_LEN {
        return Err(RfbError::Protocol(format!("string too long ({len})")));
    }
    let mut buf = vec![0u8; len as usize];
    stream.read_exact(&mut buf).await?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// DES-encrypt the challenge with the password as key.
///
/// VNC uses the password's first eight bytes, zero padded, with the bit
/// order of every byte reversed.
pub fn vnc_auth_response(password: &[u8], challenge: &[u8; 16]) -> [u8; 16] {
    let mut key = [0u8; 8];
    for (dst, src) in key.iter_mut().zip(password.iter()) {
        *dst = src.reverse_bits();
    }
    let cipher = Des::new(GenericArray::from_slice(&key));
    let mut out = *challenge;
    for block in out.chunks_exact_mut(8) {
        cipher.encrypt_block(GenericArray::from_mut_slice(block));
    }
    out
}
