//! Display list decoding and encoding.
//!
//! A display list is one packet's worth of drawing and addressing commands
//! in the controller's compact binary form. Each entry starts with a header
//! byte: the low nibble selects the opcode, the high nibble carries the
//! payload length (0-14 literal, 15 meaning an extended length follows).
//!
//! ## Extended length encoding
//!
//! One byte with the top bit clear encodes 0-127 directly; with the top bit
//! set the low 7 bits become the high byte of a 15-bit value:
//! `((b0 & 0x7F) << 8) | b1`, range 0-32767.
//!
//! ## Decoder shape
//!
//! [`DisplayList`] is a stateless, re-entrant cursor over a borrowed byte
//! slice. [`DisplayList::next_command`] materializes one typed [`Command`]
//! at a time, borrowing payload slices rather than copying them. Truncated
//! input fails with [`DecodeError::Truncated`]; unknown opcodes and
//! sub-commands decode to `Unknown` with their declared payload consumed so
//! the caller can log and keep going.
//!
//! [`DisplayListBuilder`] is the matching writer used by device-side code
//! and by the test suites to produce wire-correct lists.

use thiserror::Error;
use tracing::trace;

use crate::geom::Rect;

/// Bytes per raw pixel on the wire (blue, green, red order).
pub const BYTES_PER_PIXEL: usize = 3;

/// Largest value representable by the extended length encoding.
pub const MAX_VAR: u32 = 0x7FFF;

/// Failure to decode a display list.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    #[error("display list truncated: needed {needed} more bytes, {remaining} remain")]
    Truncated { needed: usize, remaining: usize },
}

/// Display list opcodes, the low nibble of each header byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    None = 0,
    Command = 1,
    Repeat = 2,
    SetColumn = 3,
    SetRow = 4,
    WriteStart = 5,
    WriteData = 6,
    WriteDataBuffer = 7,
    ReadStart = 8,
    Read = 9,
    Callback = 10,
}

impl Opcode {
    fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Opcode::None),
            1 => Some(Opcode::Command),
            2 => Some(Opcode::Repeat),
            3 => Some(Opcode::SetColumn),
            4 => Some(Opcode::SetRow),
            5 => Some(Opcode::WriteStart),
            6 => Some(Opcode::WriteData),
            7 => Some(Opcode::WriteDataBuffer),
            8 => Some(Opcode::ReadStart),
            9 => Some(Opcode::Read),
            10 => Some(Opcode::Callback),
            _ => None,
        }
    }
}

/// Virtual display sub-commands carried by [`Opcode::Command`].
///
/// The first payload byte selects the sub-command; the remaining bytes are
/// its little-endian operand struct.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScreenCommand {
    /// Recreate the framebuffer at new dimensions, discarding contents.
    SetSize { width: u32, height: u32 },
    /// Overlap-safe rectangular copy within the framebuffer.
    CopyPixels { src: Rect, dst_x: u32, dst_y: u32 },
    /// Shift content within `area`, wrapping or filling per axis.
    Scroll {
        area: Rect,
        shift_x: i32,
        shift_y: i32,
        wrap_x: bool,
        wrap_y: bool,
        fill: u32,
    },
    /// Alpha-composite `argb` over every pixel of `rect`.
    Fill { rect: Rect, argb: u32 },
    /// Sub-command code this engine does not implement.
    Unknown { code: u8 },
}

/// One decoded display list entry with fully materialized operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command<'a> {
    /// Configure the horizontal extent of the address window.
    SetColumn { start: u32, width: u32 },
    /// Configure the vertical extent of the address window.
    SetRow { start: u32, height: u32 },
    /// Reset the address window, then write raw BGR pixel triplets.
    WriteStart { pixels: &'a [u8] },
    /// Write raw BGR pixel triplets at the current cursor.
    WriteData { pixels: &'a [u8] },
    /// Pixel payload of `byte_len` bytes follows as the next packet.
    WriteDataBuffer { byte_len: usize },
    /// Apply `pattern` through the address window `count` times.
    Repeat { count: u32, pattern: &'a [u8] },
    /// A virtual display sub-command.
    Screen(ScreenCommand),
    /// Reset the address window, then read back `byte_len / 3` pixels.
    ReadStart { byte_len: usize },
    /// Read back `byte_len / 3` pixels at the current cursor.
    Read { byte_len: usize },
    /// Device-side callback marker; acknowledged, never executed here.
    Callback,
    /// Opcode this engine does not understand; payload already skipped.
    Unknown { code: u8, skipped: usize },
}

/// Cursor over one packet's display list bytes.
pub struct DisplayList<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> DisplayList<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    /// Current cursor position, for diagnostics.
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn is_done(&self) -> bool {
        self.offset >= self.data.len()
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.offset
    }

    fn read_u8(&mut self) -> Result<u8, DecodeError> {
        if self.offset >= self.data.len() {
            return Err(DecodeError::Truncated { needed: 1, remaining: 0 });
        }
        let value = self.data[self.offset];
        self.offset += 1;
        Ok(value)
    }

    fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        if self.remaining() < len {
            return Err(DecodeError::Truncated { needed: len, remaining: self.remaining() });
        }
        let slice = &self.data[self.offset..self.offset + len];
        self.offset += len;
        Ok(slice)
    }

    /// Read one extended-length value (0-32767).
    fn read_var(&mut self) -> Result<u32, DecodeError> {
        let b0 = self.read_u8()?;
        if b0 & 0x80 == 0 {
            Ok(u32::from(b0))
        } else {
            let b1 = self.read_u8()?;
            Ok((u32::from(b0 & 0x7F) << 8) | u32::from(b1))
        }
    }

    /// Read a header byte, returning the raw opcode code and payload length.
    fn read_header(&mut self) -> Result<(u8, usize), DecodeError> {
        let header = self.read_u8()?;
        let code = header & 0x0F;
        let marker = header >> 4;
        let len = if marker == 0x0F { self.read_var()? as usize } else { marker as usize };
        Ok((code, len))
    }

    /// Decode the next command, or `None` at the end of the list.
    ///
    /// Entries with [`Opcode::None`] are consumed transparently.
    pub fn next_command(&mut self) -> Result<Option<Command<'a>>, DecodeError> {
        loop {
            if self.is_done() {
                return Ok(None);
            }
            let start = self.offset;
            let (code, len) = self.read_header()?;
            let opcode = Opcode::from_code(code);
            trace!(offset = start, code, len, "display list entry");

            let command = match opcode {
                Some(Opcode::None) => {
                    self.read_bytes(len)?;
                    continue;
                }
                Some(Opcode::SetColumn) => {
                    Command::SetColumn { start: self.read_var()?, width: len as u32 + 1 }
                }
                Some(Opcode::SetRow) => {
                    Command::SetRow { start: self.read_var()?, height: len as u32 + 1 }
                }
                Some(Opcode::WriteStart) => Command::WriteStart { pixels: self.read_bytes(len)? },
                Some(Opcode::WriteData) => Command::WriteData { pixels: self.read_bytes(len)? },
                Some(Opcode::WriteDataBuffer) => {
                    // Device-side buffer pointer, meaningless on this end.
                    self.read_bytes(4)?;
                    Command::WriteDataBuffer { byte_len: len }
                }
                Some(Opcode::Repeat) => {
                    let count = self.read_var()?;
                    Command::Repeat { count, pattern: self.read_bytes(len)? }
                }
                Some(Opcode::Command) => {
                    let sub = self.read_u8()?;
                    let payload = self.read_bytes(len)?;
                    Command::Screen(decode_screen_command(sub, payload)?)
                }
                Some(Opcode::ReadStart) => {
                    self.read_bytes(4)?;
                    Command::ReadStart { byte_len: len }
                }
                Some(Opcode::Read) => {
                    self.read_bytes(4)?;
                    Command::Read { byte_len: len }
                }
                Some(Opcode::Callback) => {
                    // Callback function pointer, then 4-byte-aligned parameters.
                    self.read_bytes(4)?;
                    if len != 0 {
                        let aligned = (self.offset + 3) & !3;
                        let pad = aligned - self.offset;
                        self.read_bytes(pad)?;
                        self.read_bytes(len)?;
                    }
                    Command::Callback
                }
                None => {
                    self.read_bytes(len)?;
                    Command::Unknown { code, skipped: len }
                }
            };
            return Ok(Some(command));
        }
    }
}

fn decode_screen_command(sub: u8, payload: &[u8]) -> Result<ScreenCommand, DecodeError> {
    let command = match sub {
        0 => {
            check_len(payload, 4)?;
            ScreenCommand::SetSize {
                width: u32::from(u16_le(payload, 0)),
                height: u32::from(u16_le(payload, 2)),
            }
        }
        1 => {
            check_len(payload, 12)?;
            ScreenCommand::CopyPixels {
                src: rect_le(payload, 0),
                dst_x: u32::from(u16_le(payload, 8)),
                dst_y: u32::from(u16_le(payload, 10)),
            }
        }
        2 => {
            check_len(payload, 18)?;
            ScreenCommand::Scroll {
                area: rect_le(payload, 0),
                shift_x: i32::from(i16_le(payload, 8)),
                shift_y: i32::from(i16_le(payload, 10)),
                wrap_x: payload[12] != 0,
                wrap_y: payload[13] != 0,
                fill: u32_le(payload, 14),
            }
        }
        3 => {
            check_len(payload, 12)?;
            ScreenCommand::Fill { rect: rect_le(payload, 0), argb: u32_le(payload, 8) }
        }
        code => ScreenCommand::Unknown { code },
    };
    Ok(command)
}

fn check_len(payload: &[u8], needed: usize) -> Result<(), DecodeError> {
    if payload.len() < needed {
        Err(DecodeError::Truncated { needed, remaining: payload.len() })
    } else {
        Ok(())
    }
}

fn u16_le(data: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([data[offset], data[offset + 1]])
}

fn i16_le(data: &[u8], offset: usize) -> i16 {
    i16::from_le_bytes([data[offset], data[offset + 1]])
}

fn u32_le(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([data[offset], data[offset + 1], data[offset + 2], data[offset + 3]])
}

fn rect_le(data: &[u8], offset: usize) -> Rect {
    Rect::new(
        u32::from(u16_le(data, offset)),
        u32::from(u16_le(data, offset + 2)),
        u32::from(u16_le(data, offset + 4)),
        u32::from(u16_le(data, offset + 6)),
    )
}

/// Writer for wire-correct display lists, the device-side counterpart of
/// [`DisplayList`]. The engine's test suites use it as the canonical test
/// vector generator.
#[derive(Debug, Default)]
pub struct DisplayListBuilder {
    buf: Vec<u8>,
}

impl DisplayListBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn header(&mut self, opcode: Opcode, len: usize) -> &mut Self {
        debug_assert!(len as u32 <= MAX_VAR);
        if len < 15 {
            self.buf.push(opcode as u8 | ((len as u8) << 4));
        } else {
            self.buf.push(opcode as u8 | 0xF0);
            self.var(len as u32);
        }
        self
    }

    fn var(&mut self, value: u32) -> &mut Self {
        debug_assert!(value <= MAX_VAR);
        if value < 0x80 {
            self.buf.push(value as u8);
        } else {
            self.buf.push(0x80 | (value >> 8) as u8);
            self.buf.push(value as u8);
        }
        self
    }

    fn u16(&mut self, value: u16) -> &mut Self {
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    fn rect(&mut self, r: Rect) -> &mut Self {
        self.u16(r.x as u16).u16(r.y as u16).u16(r.w as u16).u16(r.h as u16)
    }

    fn command(&mut self, sub: u8, operands: &[u8]) -> &mut Self {
        self.header(Opcode::Command, operands.len());
        self.buf.push(sub);
        self.buf.extend_from_slice(operands);
        self
    }

    pub fn set_column(&mut self, x: u32, width: u32) -> &mut Self {
        self.header(Opcode::SetColumn, width as usize - 1).var(x)
    }

    pub fn set_row(&mut self, y: u32, height: u32) -> &mut Self {
        self.header(Opcode::SetRow, height as usize - 1).var(y)
    }

    /// Configure the full address window in one call, the way the device
    /// firmware does before every surface write.
    pub fn set_window(&mut self, r: Rect) -> &mut Self {
        self.set_column(r.x, r.w).set_row(r.y, r.h)
    }

    /// `pixels` are BGR triplets.
    pub fn write_start(&mut self, pixels: &[u8]) -> &mut Self {
        self.header(Opcode::WriteStart, pixels.len());
        self.buf.extend_from_slice(pixels);
        self
    }

    pub fn write_data(&mut self, pixels: &[u8]) -> &mut Self {
        self.header(Opcode::WriteData, pixels.len());
        self.buf.extend_from_slice(pixels);
        self
    }

    /// Announce an out-of-band pixel buffer of `byte_len` bytes, delivered
    /// as the next packet on the wire.
    pub fn write_data_buffer(&mut self, byte_len: usize) -> &mut Self {
        self.header(Opcode::WriteDataBuffer, byte_len);
        self.buf.extend_from_slice(&[0u8; 4]);
        self
    }

    pub fn repeat(&mut self, count: u32, pattern: &[u8]) -> &mut Self {
        self.header(Opcode::Repeat, pattern.len());
        self.var(count);
        self.buf.extend_from_slice(pattern);
        self
    }

    pub fn set_size(&mut self, width: u32, height: u32) -> &mut Self {
        let mut operands = Vec::with_capacity(4);
        operands.extend_from_slice(&(width as u16).to_le_bytes());
        operands.extend_from_slice(&(height as u16).to_le_bytes());
        self.command(0, &operands)
    }

    pub fn copy_pixels(&mut self, src: Rect, dst_x: u32, dst_y: u32) -> &mut Self {
        let mut operands = DisplayListBuilder::new();
        operands.rect(src).u16(dst_x as u16).u16(dst_y as u16);
        let operands = operands.finish();
        self.command(1, &operands)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn scroll(
        &mut self,
        area: Rect,
        shift_x: i32,
        shift_y: i32,
        wrap_x: bool,
        wrap_y: bool,
        fill: u32,
    ) -> &mut Self {
        let mut operands = DisplayListBuilder::new();
        operands.rect(area);
        operands.buf.extend_from_slice(&(shift_x as i16).to_le_bytes());
        operands.buf.extend_from_slice(&(shift_y as i16).to_le_bytes());
        operands.buf.push(wrap_x as u8);
        operands.buf.push(wrap_y as u8);
        operands.buf.extend_from_slice(&fill.to_le_bytes());
        let operands = operands.finish();
        self.command(2, &operands)
    }

    pub fn fill(&mut self, rect: Rect, argb: u32) -> &mut Self {
        let mut operands = DisplayListBuilder::new();
        operands.rect(rect);
        operands.buf.extend_from_slice(&argb.to_le_bytes());
        let operands = operands.finish();
        self.command(3, &operands)
    }

    /// Request `byte_len / 3` pixels, resetting the window first.
    pub fn read_start(&mut self, byte_len: usize) -> &mut Self {
        self.header(Opcode::ReadStart, byte_len);
        self.buf.extend_from_slice(&[0u8; 4]);
        self
    }

    pub fn read(&mut self, byte_len: usize) -> &mut Self {
        self.header(Opcode::Read, byte_len);
        self.buf.extend_from_slice(&[0u8; 4]);
        self
    }

    /// Emit a callback entry with optional 4-byte-aligned parameters.
    pub fn callback(&mut self, params: &[u8]) -> &mut Self {
        self.header(Opcode::Callback, params.len());
        self.buf.extend_from_slice(&[0u8; 4]);
        if !params.is_empty() {
            while self.buf.len() % 4 != 0 {
                self.buf.push(0);
            }
            self.buf.extend_from_slice(params);
        }
        self
    }

    /// Emit a raw header byte, for malformed-input tests.
    pub fn raw_header(&mut self, code: u8, len: usize) -> &mut Self {
        debug_assert!(code < 16);
        if len < 15 {
            self.buf.push(code | ((len as u8) << 4));
        } else {
            self.buf.push(code | 0xF0);
            self.var(len as u32);
        }
        self
    }

    pub fn raw_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(bytes);
        self
    }

    pub fn finish(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buf)
    }
}
