//! The engine: decode, mutate, present, report input.
//!
//! The engine exclusively owns the framebuffer and address window; packets
//! are processed one at a time and to completion, so no other context ever
//! observes a half-applied display list and nothing here needs a lock.
//!
//! The run loop alternates between a timed pull on the packet channel
//! (idle cadence ~100 ms, tightening to ~10 ms right after traffic) and the
//! renderer's event poll. Pointer input is debounced with a monotonic
//! "next allowed send" deadline rather than a timer thread: state changes
//! mark the pending input dirty, and a later loop iteration flushes it once
//! the deadline passes.

use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::address_window::AddressWindow;
use crate::display_list::{BYTES_PER_PIXEL, Command, DisplayList, ScreenCommand};
use crate::error::Result;
use crate::framebuffer::{Framebuffer, make_color};
use crate::renderer::{Renderer, WindowEvent};
use crate::transport::{DISPLAY_MAGIC, Frame, Packet, ServerChannels, TOUCH_MAGIC};

/// Largest framebuffer dimension a `SetSize` request may ask for; the wire
/// field is a `u16`, but anything past this is protocol noise rather than
/// an allocation request.
pub const MAX_DIMENSION: u32 = 4096;

/// Engine tuning knobs, consumed as plain values.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Initial framebuffer width before the device sends `SetSize`.
    pub width: u32,
    /// Initial framebuffer height.
    pub height: u32,
    /// Packet poll interval while idle.
    pub idle_poll: Duration,
    /// Packet poll interval right after processing a packet.
    pub busy_poll: Duration,
    /// How long to wait for the companion packet of a buffered write.
    pub companion_timeout: Duration,
    /// Minimum spacing between outbound touch-event frames.
    pub touch_min_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            width: 320,
            height: 240,
            idle_poll: Duration::from_millis(100),
            busy_poll: Duration::from_millis(10),
            companion_timeout: Duration::from_millis(500),
            touch_min_interval: Duration::from_millis(100),
        }
    }
}

/// Last known pointer state plus its debounce deadline.
#[derive(Debug)]
struct PendingInput {
    buttons: u32,
    x: u16,
    y: u16,
    dirty: bool,
    next_send: Instant,
}

impl PendingInput {
    fn new() -> Self {
        Self { buttons: 0, x: 0, y: 0, dirty: false, next_send: Instant::now() }
    }
}

/// Orchestrates decode → address window → framebuffer, the render/input
/// loop, and outbound traffic.
pub struct Engine {
    config: EngineConfig,
    framebuffer: Framebuffer,
    addr: AddressWindow,
    packets: mpsc::Receiver<Packet>,
    outbound: mpsc::Sender<Frame>,
    cancel: CancellationToken,
    pointer: PendingInput,
}

impl Engine {
    pub fn new(channels: ServerChannels, config: EngineConfig) -> Self {
        Self {
            framebuffer: Framebuffer::new(config.width, config.height),
            addr: AddressWindow::new(),
            packets: channels.packets,
            outbound: channels.outbound,
            cancel: channels.cancel,
            pointer: PendingInput::new(),
            config,
        }
    }

    pub fn framebuffer(&self) -> &Framebuffer {
        &self.framebuffer
    }

    /// Run until the window closes, the server ends, or cancellation.
    pub async fn run<R: Renderer>(mut self, renderer: &mut R) -> Result<()> {
        renderer.resize(self.framebuffer.width(), self.framebuffer.height());
        let mut wait = self.config.idle_poll;
        loop {
            match timeout(wait, self.packets.recv()).await {
                Ok(Some(packet)) => {
                    if let Err(error) = self.process_packet(&packet, renderer).await {
                        warn!(%error, "dropping malformed packet");
                    }
                    renderer.blit(&self.framebuffer, self.framebuffer.bounds());
                    wait = self.config.busy_poll;
                }
                Ok(None) => {
                    info!("server ended, engine stopping");
                    return Ok(());
                }
                Err(_) => wait = self.config.idle_poll,
            }

            for event in renderer.poll_events() {
                match event {
                    WindowEvent::CloseRequested => {
                        info!("close requested");
                        self.cancel.cancel();
                        return Ok(());
                    }
                    WindowEvent::Pointer { buttons, x, y } => self.pointer_event(buttons, x, y),
                }
            }
            self.flush_pointer().await;

            if self.cancel.is_cancelled() {
                return Ok(());
            }
        }
    }

    /// Apply one packet's display list in full.
    async fn process_packet<R: Renderer>(
        &mut self,
        packet: &Packet,
        renderer: &mut R,
    ) -> Result<()> {
        let mut list = DisplayList::new(packet.as_bytes());
        while let Some(command) = list.next_command()? {
            trace!(?command, offset = list.offset(), "dispatch");
            match command {
                Command::SetColumn { start, width } => self.addr.set_column(start, width),
                Command::SetRow { start, height } => self.addr.set_row(start, height),
                Command::WriteStart { pixels } => {
                    self.addr.reset();
                    self.write_pixels(pixels);
                }
                Command::WriteData { pixels } => self.write_pixels(pixels),
                Command::WriteDataBuffer { byte_len } => self.write_companion(byte_len).await,
                Command::Repeat { count, pattern } => {
                    for _ in 0..count {
                        self.write_pixels(pattern);
                    }
                }
                Command::Screen(screen) => self.screen_command(screen, renderer),
                Command::ReadStart { byte_len } => {
                    self.addr.reset();
                    self.read_pixels(byte_len).await;
                }
                Command::Read { byte_len } => self.read_pixels(byte_len).await,
                Command::Callback => trace!("callback acknowledged"),
                Command::Unknown { code, skipped } => {
                    warn!(code, skipped, "unknown opcode, skipped");
                }
            }
        }
        Ok(())
    }

    /// Write BGR triplets through the address window, stopping silently
    /// when the window's capacity is exhausted.
    fn write_pixels(&mut self, data: &[u8]) {
        for bgr in data.chunks_exact(BYTES_PER_PIXEL) {
            if !self.addr.has_capacity() {
                break;
            }
            let rgb = make_color(bgr[2], bgr[1], bgr[0]);
            self.framebuffer.set_at(self.addr.pos(), rgb);
            self.addr.step();
        }
    }

    /// The pixel payload of a buffered write arrives as the next packet;
    /// a missing or late companion is logged and survived.
    async fn write_companion(&mut self, byte_len: usize) {
        match timeout(self.config.companion_timeout, self.packets.recv()).await {
            Ok(Some(packet)) => {
                if packet.len() != byte_len {
                    debug!(expected = byte_len, got = packet.len(), "write buffer length mismatch");
                }
                self.write_pixels(packet.as_bytes());
            }
            Ok(None) => warn!("server ended while awaiting write buffer"),
            Err(_) => warn!("missing write packet"),
        }
    }

    /// Stream pixels back to the device, blue-green-red, stopping early on
    /// exhausted capacity.
    async fn read_pixels(&mut self, byte_len: usize) {
        let count = byte_len / BYTES_PER_PIXEL;
        let mut payload = Vec::with_capacity(count * BYTES_PER_PIXEL);
        for _ in 0..count {
            if !self.addr.has_capacity() {
                break;
            }
            let rgb = self.framebuffer.get_at(self.addr.pos());
            self.addr.step();
            payload.push(rgb as u8);
            payload.push((rgb >> 8) as u8);
            payload.push((rgb >> 16) as u8);
        }
        debug!(requested = byte_len, returned = payload.len(), "pixel read-back");
        if self.outbound.send(Frame::new(DISPLAY_MAGIC, payload)).await.is_err() {
            debug!("outbound channel closed, read-back dropped");
        }
    }

    fn screen_command<R: Renderer>(&mut self, command: ScreenCommand, renderer: &mut R) {
        match command {
            ScreenCommand::SetSize { width, height } => {
                if width == 0 || height == 0 || width > MAX_DIMENSION || height > MAX_DIMENSION {
                    warn!(width, height, "implausible display size, ignored");
                    return;
                }
                if width == self.framebuffer.width() && height == self.framebuffer.height() {
                    return;
                }
                info!(width, height, "display resized");
                self.framebuffer = Framebuffer::new(width, height);
                self.addr = AddressWindow::new();
                renderer.resize(width, height);
            }
            ScreenCommand::CopyPixels { src, dst_x, dst_y } => {
                self.framebuffer.copy(src, dst_x, dst_y);
            }
            ScreenCommand::Scroll { area, shift_x, shift_y, wrap_x, wrap_y, fill } => {
                self.framebuffer.scroll(area, shift_x, shift_y, wrap_x, wrap_y, fill);
            }
            ScreenCommand::Fill { rect, argb } => self.framebuffer.fill(rect, argb),
            ScreenCommand::Unknown { code } => warn!(code, "unknown sub-command"),
        }
    }

    /// Record a pointer change. Pure hover (no buttons before or after) is
    /// ignored, matching the device-side touch interface.
    fn pointer_event(&mut self, buttons: u32, x: u16, y: u16) {
        if self.pointer.buttons == 0 && buttons == 0 {
            return;
        }
        if self.pointer.buttons == buttons && self.pointer.x == x && self.pointer.y == y {
            return;
        }
        self.pointer.buttons = buttons;
        self.pointer.x = x;
        self.pointer.y = y;
        self.pointer.dirty = true;
    }

    /// Send the pending pointer state once the debounce deadline allows.
    async fn flush_pointer(&mut self) {
        if !self.pointer.dirty || Instant::now() < self.pointer.next_send {
            return;
        }
        let mut payload = Vec::with_capacity(8);
        payload.extend_from_slice(&self.pointer.buttons.to_le_bytes());
        payload.extend_from_slice(&self.pointer.x.to_le_bytes());
        payload.extend_from_slice(&self.pointer.y.to_le_bytes());
        trace!(buttons = self.pointer.buttons, x = self.pointer.x, y = self.pointer.y, "touch event");
        if self.outbound.send(Frame::new(TOUCH_MAGIC, payload)).await.is_err() {
            debug!("outbound channel closed, touch event dropped");
        }
        self.pointer.dirty = false;
        self.pointer.next_send = Instant::now() + self.config.touch_min_interval;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display_list::DisplayListBuilder;
    use crate::geom::Rect;
    use crate::renderer::Headless;

    fn test_engine_with(
        width: u32,
        height: u32,
    ) -> (Engine, mpsc::Sender<Packet>, mpsc::Receiver<Frame>) {
        let (packet_tx, packets) = mpsc::channel(2);
        let (outbound, outbound_rx) = mpsc::channel(16);
        let channels = ServerChannels {
            local_addr: "127.0.0.1:0".parse().unwrap(),
            packets,
            outbound,
            cancel: CancellationToken::new(),
        };
        let config = EngineConfig {
            width,
            height,
            companion_timeout: Duration::from_millis(50),
            ..EngineConfig::default()
        };
        (Engine::new(channels, config), packet_tx, outbound_rx)
    }

    fn test_engine() -> (Engine, mpsc::Sender<Packet>, mpsc::Receiver<Frame>) {
        test_engine_with(8, 8)
    }

    async fn apply(engine: &mut Engine, bytes: Vec<u8>) {
        let mut renderer = Headless::new();
        engine.process_packet(&Packet(bytes), &mut renderer).await.unwrap();
    }

    #[tokio::test]
    async fn windowed_write_lands_row_major() {
        let (mut engine, _tx, _rx) = test_engine();
        let white = [0xFFu8; 3].repeat(6);
        let bytes = DisplayListBuilder::new()
            .set_column(2, 3)
            .set_row(1, 2)
            .write_start(&white)
            .finish();
        apply(&mut engine, bytes).await;

        for (x, y) in [(2, 1), (3, 1), (4, 1), (2, 2), (3, 2), (4, 2)] {
            assert_eq!(engine.framebuffer().get(x, y), 0xFF_FFFF, "pixel ({x}, {y})");
        }
        // Everything outside the window is untouched.
        assert_eq!(engine.framebuffer().get(1, 1), 0);
        assert_eq!(engine.framebuffer().get(5, 1), 0);
        assert_eq!(engine.framebuffer().get(2, 3), 0);
    }

    #[tokio::test]
    async fn pixels_decode_blue_green_red() {
        let (mut engine, _tx, _rx) = test_engine();
        let bytes = DisplayListBuilder::new()
            .set_column(0, 1)
            .set_row(0, 1)
            .write_start(&[0x30, 0x20, 0x10])
            .finish();
        apply(&mut engine, bytes).await;
        assert_eq!(engine.framebuffer().get(0, 0), 0x10_2030);
    }

    #[tokio::test]
    async fn writes_beyond_capacity_are_dropped() {
        let (mut engine, _tx, _rx) = test_engine();
        let bytes = DisplayListBuilder::new()
            .set_column(0, 2)
            .set_row(0, 2)
            .write_start(&[0x11; 3 * 9])
            .finish();
        apply(&mut engine, bytes).await;

        for y in 0..2 {
            for x in 0..2 {
                assert_eq!(engine.framebuffer().get(x, y), 0x11_1111);
            }
        }
        assert_eq!(engine.framebuffer().get(2, 0), 0);
        assert_eq!(engine.framebuffer().get(0, 2), 0);
    }

    #[tokio::test]
    async fn repeat_applies_pattern_through_window() {
        let (mut engine, _tx, _rx) = test_engine();
        let bytes = DisplayListBuilder::new()
            .set_column(0, 3)
            .set_row(0, 1)
            .write_start(&[])
            .repeat(3, &[0x01, 0x02, 0x03])
            .finish();
        apply(&mut engine, bytes).await;
        for x in 0..3 {
            assert_eq!(engine.framebuffer().get(x, 0), 0x03_0201);
        }
    }

    #[tokio::test]
    async fn fill_then_read_back_returns_bgr_triplets() {
        let (mut engine, _tx, mut rx) = test_engine();
        let bytes = DisplayListBuilder::new()
            .set_size(4, 4)
            .fill(Rect::new(0, 0, 4, 4), 0xFF10_2030)
            .set_window(Rect::new(0, 0, 4, 4))
            .read_start(48)
            .finish();
        apply(&mut engine, bytes).await;

        let frame = rx.try_recv().expect("read-back frame");
        assert_eq!(frame.magic, DISPLAY_MAGIC);
        assert_eq!(frame.payload.len(), 48);
        for triplet in frame.payload.chunks_exact(3) {
            assert_eq!(triplet, &[0x30, 0x20, 0x10]);
        }
    }

    #[tokio::test]
    async fn read_stops_early_when_window_exhausted() {
        let (mut engine, _tx, mut rx) = test_engine();
        let bytes = DisplayListBuilder::new()
            .set_window(Rect::new(0, 0, 2, 2))
            .read_start(48)
            .finish();
        apply(&mut engine, bytes).await;
        let frame = rx.try_recv().expect("read-back frame");
        assert_eq!(frame.payload.len(), 4 * 3);
    }

    #[tokio::test]
    async fn set_size_resizes_renderer_and_discards_contents() {
        let (mut engine, _tx, _rx) = test_engine();
        let mut renderer = Headless::new();
        let bytes = DisplayListBuilder::new()
            .set_window(Rect::new(0, 0, 1, 1))
            .write_start(&[0xFF; 3])
            .set_size(16, 4)
            .finish();
        engine.process_packet(&Packet(bytes), &mut renderer).await.unwrap();
        assert_eq!(renderer.size(), (16, 4));
        assert_eq!(engine.framebuffer().width(), 16);
        assert_eq!(engine.framebuffer().get(0, 0), 0);
    }

    #[tokio::test]
    async fn implausible_set_size_is_ignored() {
        let (mut engine, _tx, _rx) = test_engine();
        let bytes = DisplayListBuilder::new().set_size(65535, 65535).finish();
        apply(&mut engine, bytes).await;
        assert_eq!(engine.framebuffer().width(), 8);
        assert_eq!(engine.framebuffer().height(), 8);

        let bytes = DisplayListBuilder::new().set_size(0, 4).finish();
        apply(&mut engine, bytes).await;
        assert_eq!(engine.framebuffer().width(), 8);
        assert_eq!(engine.framebuffer().height(), 8);
    }

    #[tokio::test]
    async fn companion_packet_feeds_buffered_write() {
        let (mut engine, tx, _rx) = test_engine();
        tx.send(Packet([0x30, 0x20, 0x10].to_vec())).await.unwrap();
        let bytes = DisplayListBuilder::new()
            .set_window(Rect::new(0, 0, 1, 1))
            .write_data_buffer(3)
            .finish();
        apply(&mut engine, bytes).await;
        assert_eq!(engine.framebuffer().get(0, 0), 0x10_2030);
    }

    #[tokio::test]
    async fn missing_companion_packet_is_survived() {
        let (mut engine, _tx, _rx) = test_engine();
        let bytes = DisplayListBuilder::new()
            .set_window(Rect::new(0, 0, 1, 1))
            .write_data_buffer(3)
            .write_data(&[0x05, 0x05, 0x05])
            .finish();
        // Times out after companion_timeout, then the rest of the list
        // still applies.
        apply(&mut engine, bytes).await;
        assert_eq!(engine.framebuffer().get(0, 0), 0x05_0505);
    }

    #[tokio::test]
    async fn scroll_command_rotates_row() {
        let (mut engine, _tx, _rx) = test_engine();
        let mut pixels = Vec::new();
        for v in 0u8..8 {
            pixels.extend_from_slice(&[v, 0, 0]);
        }
        let bytes = DisplayListBuilder::new()
            .set_window(Rect::new(0, 0, 8, 1))
            .write_start(&pixels)
            .scroll(Rect::new(0, 0, 8, 1), 3, 0, true, false, 0)
            .finish();
        apply(&mut engine, bytes).await;
        let row: Vec<u32> = (0..8).map(|x| engine.framebuffer().get(x, 0)).collect();
        assert_eq!(row, vec![5, 6, 7, 0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn unknown_opcode_does_not_disturb_rest_of_list() {
        let (mut engine, _tx, _rx) = test_engine();
        let bytes = DisplayListBuilder::new()
            .set_window(Rect::new(0, 0, 1, 1))
            .raw_header(12, 2)
            .raw_bytes(&[0xAA, 0xBB])
            .write_start(&[0x01, 0x01, 0x01])
            .finish();
        apply(&mut engine, bytes).await;
        assert_eq!(engine.framebuffer().get(0, 0), 0x01_0101);
    }

    #[tokio::test]
    async fn pointer_events_are_debounced() {
        let (mut engine, _tx, mut rx) = test_engine();
        engine.pointer_event(1, 10, 20);
        engine.flush_pointer().await;
        let frame = rx.try_recv().expect("first touch frame");
        assert_eq!(frame.magic, TOUCH_MAGIC);
        assert_eq!(frame.payload, vec![1, 0, 0, 0, 10, 0, 20, 0]);

        // Within the debounce window: recorded but not sent yet.
        engine.pointer_event(1, 11, 21);
        engine.flush_pointer().await;
        assert!(rx.try_recv().is_err());

        // After the deadline the trailing state goes out.
        tokio::time::sleep(engine.config.touch_min_interval).await;
        engine.flush_pointer().await;
        let frame = rx.try_recv().expect("trailing touch frame");
        assert_eq!(frame.payload, vec![1, 0, 0, 0, 11, 0, 21, 0]);
    }

    #[tokio::test]
    async fn hover_without_buttons_is_ignored() {
        let (mut engine, _tx, mut rx) = test_engine();
        engine.pointer_event(0, 5, 5);
        engine.flush_pointer().await;
        assert!(rx.try_recv().is_err());

        // Release after a press is reported even though buttons are zero.
        engine.pointer_event(1, 5, 5);
        engine.flush_pointer().await;
        rx.try_recv().expect("press frame");
        tokio::time::sleep(engine.config.touch_min_interval).await;
        engine.pointer_event(0, 5, 5);
        engine.flush_pointer().await;
        let frame = rx.try_recv().expect("release frame");
        assert_eq!(&frame.payload[..4], &[0, 0, 0, 0]);
    }

    #[tokio::test]
    async fn run_loop_stops_on_close_request() {
        let (engine, _tx, _rx) = test_engine();
        let mut renderer = Headless::new();
        renderer.push_event(WindowEvent::CloseRequested);
        engine.run(&mut renderer).await.unwrap();
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn write_sets_exactly_the_first_n_cells_row_major(
                w in 1u32..10,
                h in 1u32..10,
                n in 0usize..120,
            ) {
                let (mut engine, _tx, _rx) = test_engine_with(16, 16);
                engine.addr.set_column(3, w);
                engine.addr.set_row(2, h);
                engine.addr.reset();

                // Blue channel carries 1-based pixel index.
                let mut data = Vec::with_capacity(n * BYTES_PER_PIXEL);
                for i in 0..n {
                    data.extend_from_slice(&[(i + 1) as u8, 0, 0]);
                }
                engine.write_pixels(&data);

                let written = n.min((w * h) as usize);
                for k in 0..written {
                    let x = 3 + (k as u32) % w;
                    let y = 2 + (k as u32) / w;
                    prop_assert_eq!(engine.framebuffer.get(x, y), (k + 1) as u32);
                }
                let touched = (0..16u32)
                    .flat_map(|y| (0..16u32).map(move |x| (x, y)))
                    .filter(|&(x, y)| engine.framebuffer.get(x, y) != 0)
                    .count();
                prop_assert_eq!(touched, written);
            }
        }
    }
}
