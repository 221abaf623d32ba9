//! Translation of EVDI damage into VNC "region modified" notifications.

use log::{debug, trace};

use crate::evdi::{DisplayDevice, RectSet};
use crate::vnc::RfbServer;

/// Grabs damage from the device and forwards it to the VNC screen.
#[derive(Debug, Default)]
pub struct DamageTranslator {
    rects: RectSet,
}

impl DamageTranslator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Grab the pending damage and mark each rectangle modified on `server`,
    /// once and in the order the device reported them.
    ///
    /// Rectangles are clipped to the `width` x `height` framebuffer and empty
    /// ones skipped. Without a running server the damage is still grabbed, so
    /// the device can move on, but dropped.
    ///
    /// Returns the number of rectangles forwarded.
    pub fn translate<D, S>(
        &mut self,
        device: &mut D,
        server: Option<&mut S>,
        width: u32,
        height: u32,
    ) -> usize
    where
        D: DisplayDevice + ?Sized,
        S: RfbServer,
    {
        self.rects.clear();
        device.grab_pixels(&mut self.rects);

        let Some(server) = server else {
            debug!("Dropping {} damage rects: VNC server not running", self.rects.len());
            return 0;
        };

        let mut forwarded = 0;
        for rect in self.rects.iter().filter_map(|r| r.clip(width, height)) {
            trace!("Damage {:?}", rect);
            server.mark_rect_as_modified(rect);
            forwarded += 1;
        }
        forwarded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evdi::{Rect, MAX_RECTS};
    use crate::testing::{MockDevice, MockServer, ServerCall};
    use crate::vnc::{ScreenGeometry, ServerOptions};
    use crate::evdi::Mode;

    fn server() -> MockServer {
        let geometry = ScreenGeometry::for_mode(&Mode::new(1920, 1080, 32, 60));
        MockServer::create(geometry, &ServerOptions::default()).unwrap()
    }

    #[test]
    fn forwards_rects_in_order() {
        let mut device = MockDevice::new();
        device.push_damage(&[Rect::new(0, 0, 10, 10), Rect::new(5, 5, 15, 15)]);
        let mut server = server();

        let n = DamageTranslator::new().translate(&mut device, Some(&mut server), 1920, 1080);

        assert_eq!(n, 2);
        assert_eq!(
            server.calls,
            vec![
                ServerCall::Mark(Rect::new(0, 0, 10, 10)),
                ServerCall::Mark(Rect::new(5, 5, 15, 15)),
            ]
        );
    }

    #[test]
    fn empty_damage_makes_no_server_calls() {
        let mut device = MockDevice::new();
        device.push_damage(&[]);
        let mut server = server();

        let n = DamageTranslator::new().translate(&mut device, Some(&mut server), 1920, 1080);

        assert_eq!(n, 0);
        assert!(server.calls.is_empty());
    }

    #[test]
    fn full_report_is_not_truncated() {
        let rects: Vec<Rect> = (0..MAX_RECTS as i32)
            .map(|i| Rect::new(i * 10, 0, i * 10 + 5, 5))
            .collect();
        let mut device = MockDevice::new();
        device.push_damage(&rects);
        let mut server = server();

        let n = DamageTranslator::new().translate(&mut device, Some(&mut server), 1920, 1080);

        assert_eq!(n, MAX_RECTS);
        assert_eq!(server.marks(), rects);
    }

    #[test]
    fn oversized_count_is_clamped() {
        let rects = vec![Rect::new(0, 0, 1, 1); MAX_RECTS];
        let mut device = MockDevice::new();
        device.push_raw_damage(&rects, 64);
        let mut server = server();

        let n = DamageTranslator::new().translate(&mut device, Some(&mut server), 1920, 1080);

        assert_eq!(n, MAX_RECTS);
    }

    #[test]
    fn out_of_bounds_damage_is_clipped() {
        let mut device = MockDevice::new();
        device.push_damage(&[Rect::new(1900, 1000, 2000, 1100), Rect::new(1920, 0, 1930, 4)]);
        let mut server = server();

        DamageTranslator::new().translate(&mut device, Some(&mut server), 1920, 1080);

        assert_eq!(server.marks(), vec![Rect::new(1900, 1000, 1920, 1080)]);
    }

    #[test]
    fn damage_without_server_is_drained() {
        let mut device = MockDevice::new();
        device.push_damage(&[Rect::new(0, 0, 10, 10)]);

        let n = DamageTranslator::new().translate::<_, MockServer>(&mut device, None, 1920, 1080);

        assert_eq!(n, 0);
        assert_eq!(device.calls(), &[crate::testing::DeviceCall::Grab]);
    }
}
