//! Display session: one RFB connection to the remote framebuffer.
//!
//! The connection is opened lazily by the first operation that needs it and
//! dropped after any transport error, so the next call reconnects.

pub mod keysym;
pub mod rfb;

use std::io::Cursor;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder, RgbaImage};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use crate::result::ToolError;
use rfb::{Button, RfbClient, RfbError};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(15);
const MULTI_CLICK_GAP: Duration = Duration::from_millis(100);

#[derive(Error, Debug)]
pub enum DisplayError {
    #[error("connection to {0} timed out")]
    Timeout(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("rfb error: {0}")]
    Rfb(#[from] RfbError),

    #[error("invalid region: {0}")]
    InvalidRegion(String),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("invalid button: {0:?} is not a wheel button")]
    NotAWheel(Button),

    #[error("png encoding failed: {0}")]
    Encode(#[from] image::ImageError),
}

impl From<DisplayError> for ToolError {
    fn from(e: DisplayError) -> Self {
        match e {
            DisplayError::InvalidRegion(_) | DisplayError::InvalidKey(_) | DisplayError::NotAWheel(_) => {
                ToolError::Validation(e.to_string())
            }
            DisplayError::Encode(_) => ToolError::Remote(e.to_string()),
            _ => ToolError::Connection(e.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DisplayConfig {
    pub host: String,
    pub port: u16,
    /// Not used by the None/VNC security types; kept for logging.
    pub username: Option<String>,
    pub password: Option<String>,
}

impl DisplayConfig {
    fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Anything that can produce a full-screen capture.
#[async_trait]
pub trait ScreenSource: Send + Sync {
    async fn capture_screenshot(&self) -> Result<RgbaImage, DisplayError>;
}

pub struct DisplaySession {
    config: DisplayConfig,
    client: Mutex<Option<RfbClient<TcpStream>>>,
}

impl DisplaySession {
    pub fn new(config: DisplayConfig) -> Self {
        Self {
            config,
            client: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &DisplayConfig {
        &self.config
    }

    pub async fn is_connected(&self) -> bool {
        self.client.lock().await.is_some()
    }

    /// Open the connection if it is not already open.
    pub async fn connect(&self) -> bool {
        let mut slot = self.client.lock().await;
        if slot.is_some() {
            return true;
        }
        match self.open().await {
            Ok(client) => {
                *slot = Some(client);
                true
            }
            Err(e) => {
                tracing::warn!(addr = %self.config.addr(), error = %e, "VNC connect failed");
                false
            }
        }
    }

    pub async fn disconnect(&self) {
        let Some(mut client) = self.client.lock().await.take() else {
            return;
        };
        if let Err(e) = client.shutdown().await {
            tracing::debug!(error = %e, "VNC shutdown");
        }
        tracing::info!(addr = %self.config.addr(), "VNC disconnected");
    }

    pub async fn capture_screenshot(&self) -> Result<RgbaImage, DisplayError> {
        let mut slot = self.client.lock().await;
        let client = self.ensure(&mut slot).await?;
        let res = client.capture().await;
        let (w, h, pixels) = settle(&mut slot, res)?;
        RgbaImage::from_raw(u32::from(w), u32::from(h), pixels)
            .ok_or_else(|| DisplayError::InvalidRegion("framebuffer size mismatch".into()))
    }

    /// Capture a sub-rectangle, clamped to the framebuffer.
    pub async fn capture_region(
        &self,
        x: u32,
        y: u32,
        w: u32,
        h: u32,
    ) -> Result<RgbaImage, DisplayError> {
        let full = self.capture_screenshot().await?;
        let (x, y, w, h) = clamp_region(full.width(), full.height(), x, y, w, h)?;
        Ok(image::imageops::crop_imm(&full, x, y, w, h).to_image())
    }

    pub async fn mouse_move(&self, x: u32, y: u32) -> Result<(), DisplayError> {
        let (x, y) = (to_u16(x)?, to_u16(y)?);
        let mut slot = self.client.lock().await;
        let client = self.ensure(&mut slot).await?;
        let res = client.pointer_move(x, y).await;
        settle(&mut slot, res)
    }

    /// Move to `(x, y)`, then press and release `button` `count` times.
    pub async fn mouse_click(
        &self,
        x: u32,
        y: u32,
        button: Button,
        count: u32,
    ) -> Result<(), DisplayError> {
        let (x, y) = (to_u16(x)?, to_u16(y)?);
        let mut slot = self.client.lock().await;
        let client = self.ensure(&mut slot).await?;
        let res = click_at(client, x, y, button, count).await;
        settle(&mut slot, res)
    }

    /// One press/release pair of a wheel button per step.
    pub async fn mouse_scroll(&self, steps: u32, button: Button) -> Result<(), DisplayError> {
        if !matches!(
            button,
            Button::WheelUp | Button::WheelDown | Button::WheelLeft | Button::WheelRight
        ) {
            return Err(DisplayError::NotAWheel(button));
        }
        let mut slot = self.client.lock().await;
        let client = self.ensure(&mut slot).await?;
        let mut res = Ok(());
        for _ in 0..steps {
            res = click(client, button).await;
            if res.is_err() {
                break;
            }
        }
        settle(&mut slot, res)
    }

    pub async fn type_text(&self, text: &str) -> Result<(), DisplayError> {
        let mut slot = self.client.lock().await;
        let client = self.ensure(&mut slot).await?;
        let mut res = Ok(());
        for c in text.chars() {
            res = tap(client, keysym::char_keysym(c)).await;
            if res.is_err() {
                break;
            }
        }
        settle(&mut slot, res)
    }

    /// Press a combo like `ctrl+alt+t`: keys go down in order and come up in
    /// reverse.
    pub async fn key_press(&self, combo: &str) -> Result<(), DisplayError> {
        let keys = keysym::parse_combo(combo).map_err(DisplayError::InvalidKey)?;
        let mut slot = self.client.lock().await;
        let client = self.ensure(&mut slot).await?;
        let res = press_combo(client, &keys).await;
        settle(&mut slot, res)
    }

    async fn ensure<'a>(
        &self,
        slot: &'a mut Option<RfbClient<TcpStream>>,
    ) -> Result<&'a mut RfbClient<TcpStream>, DisplayError> {
        if slot.is_none() {
            *slot = Some(self.open().await?);
        }
        slot.as_mut()
            .ok_or_else(|| DisplayError::Timeout(self.config.addr()))
    }

    async fn open(&self) -> Result<RfbClient<TcpStream>, DisplayError> {
        let addr = self.config.addr();
        let stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(&addr))
            .await
            .map_err(|_| DisplayError::Timeout(addr.clone()))??;
        stream.set_nodelay(true)?;
        let client = tokio::time::timeout(
            HANDSHAKE_TIMEOUT,
            RfbClient::handshake(stream, self.config.password.as_deref()),
        )
        .await
        .map_err(|_| DisplayError::Timeout(addr.clone()))??;
        tracing::info!(
            addr = %addr,
            user = self.config.username.as_deref().unwrap_or(""),
            desktop = client.name(),
            size = ?client.size(),
            "VNC connected"
        );
        Ok(client)
    }
}

#[async_trait]
impl ScreenSource for DisplaySession {
    async fn capture_screenshot(&self) -> Result<RgbaImage, DisplayError> {
        DisplaySession::capture_screenshot(self).await
    }
}

/// Drop the client after a transport error so the next call reconnects.
fn settle<T>(
    slot: &mut Option<RfbClient<TcpStream>>,
    res: Result<T, RfbError>,
) -> Result<T, DisplayError> {
    if let Err(e) = &res {
        tracing::warn!(error = %e, "VNC operation failed, dropping connection");
        *slot = None;
    }
    res.map_err(DisplayError::from)
}

async fn click(client: &mut RfbClient<TcpStream>, button: Button) -> Result<(), RfbError> {
    client.button_down(button).await?;
    client.button_up(button).await
}

async fn click_at(
    client: &mut RfbClient<TcpStream>,
    x: u16,
    y: u16,
    button: Button,
    count: u32,
) -> Result<(), RfbError> {
    client.pointer_move(x, y).await?;
    for i in 0..count {
        if i > 0 {
            tokio::time::sleep(MULTI_CLICK_GAP).await;
        }
        click(client, button).await?;
    }
    Ok(())
}

async fn tap(client: &mut RfbClient<TcpStream>, sym: u32) -> Result<(), RfbError> {
    client.key_event(sym, true).await?;
    client.key_event(sym, false).await
}

async fn press_combo(client: &mut RfbClient<TcpStream>, keys: &[u32]) -> Result<(), RfbError> {
    for &k in keys {
        client.key_event(k, true).await?;
    }
    for &k in keys.iter().rev() {
        client.key_event(k, false).await?;
    }
    Ok(())
}

fn to_u16(v: u32) -> Result<u16, DisplayError> {
    u16::try_from(v).map_err(|_| DisplayError::InvalidRegion(format!("coordinate {v} out of range")))
}

/// Clip `(x, y, w, h)` to a `fb_w × fb_h` framebuffer.
pub fn clamp_region(
    fb_w: u32,
    fb_h: u32,
    x: u32,
    y: u32,
    w: u32,
    h: u32,
) -> Result<(u32, u32, u32, u32), DisplayError> {
    if x >= fb_w || y >= fb_h {
        return Err(DisplayError::InvalidRegion(format!(
            "origin ({x}, {y}) lies outside the {fb_w}x{fb_h} screen"
        )));
    }
    let w = w.min(fb_w - x);
    let h = h.min(fb_h - y);
    if w == 0 || h == 0 {
        return Err(DisplayError::InvalidRegion("region is empty".into()));
    }
    Ok((x, y, w, h))
}

pub fn encode_png(img: &RgbaImage) -> Result<Vec<u8>, DisplayError> {
    let mut buf = Cursor::new(Vec::new());
    PngEncoder::new(&mut buf).write_image(
        img.as_raw(),
        img.width(),
        img.height(),
        ExtendedColorType::Rgba8,
    )?;
    Ok(buf.into_inner())
}

pub fn png_base64(img: &RgbaImage) -> Result<String, DisplayError> {
    Ok(base64::engine::general_purpose::STANDARD.encode(encode_png(img)?))
}
