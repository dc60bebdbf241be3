//! X11 RandR display backend
//!
//! Monitor keys are RandR output names ("DP-1", "HDMI-A-0"). The empty key
//! resolves to the output RandR reports as primary.

use anyhow::{Context, Result};
use tracing::{debug, info, warn};
use x11rb::connection::Connection;
use x11rb::errors::ReplyError;
use x11rb::protocol::randr::{
    self, ConnectionExt as RandrExt, GetCrtcInfoReply, GetOutputInfoReply,
    GetScreenResourcesCurrentReply, ModeFlag, ModeInfo, Rotation, SetConfig,
};
use x11rb::protocol::xproto::{ConnectionExt as XprotoExt, Window};
use x11rb::protocol::ErrorKind;
use x11rb::rust_connection::RustConnection;

use super::DisplayBackend;
use crate::error::{DisplayError, ModeChangeError, ModeChangeKind};
use crate::types::{MonitorInfo, MonitorKey, Resolution};

/// Millimetres per inch, used to keep DPI stable when resizing the screen
const MM_PER_INCH: f64 = 25.4;
/// Fallback DPI when the server reports a zero physical size
const FALLBACK_DPI: f64 = 96.0;

pub struct RandrDisplay {
    conn: RustConnection,
    root: Window,
    dpi: f64,
}

/// A connected output together with its RandR handles
struct ResolvedOutput {
    output: randr::Output,
    info: GetOutputInfoReply,
}

impl RandrDisplay {
    pub fn connect() -> Result<Self> {
        let (conn, screen_num) = x11rb::connect(None)
            .context("Failed to connect to X11 server. Is DISPLAY set correctly?")?;
        let screen = &conn.setup().roots[screen_num];
        let root = screen.root;
        let dpi = if screen.width_in_millimeters > 0 {
            f64::from(screen.width_in_pixels) * MM_PER_INCH / f64::from(screen.width_in_millimeters)
        } else {
            FALLBACK_DPI
        };

        let version = conn
            .randr_query_version(1, 5)
            .context("Failed to query RandR version")?
            .reply()
            .context("RandR extension not available")?;
        info!(
            screen = screen_num,
            randr_major = version.major_version,
            randr_minor = version.minor_version,
            "Connected to X11 server"
        );

        Ok(Self { conn, root, dpi })
    }

    fn query_error(monitor: &MonitorKey, reason: impl std::fmt::Display) -> DisplayError {
        DisplayError::QueryFailed {
            monitor: monitor.clone(),
            reason: reason.to_string(),
        }
    }

    fn resources(&self) -> Result<GetScreenResourcesCurrentReply, DisplayError> {
        self.conn
            .randr_get_screen_resources_current(self.root)
            .map_err(|e| DisplayError::Connection(e.to_string()))?
            .reply()
            .map_err(|e| DisplayError::Connection(e.to_string()))
    }

    fn output_info(
        &self,
        output: randr::Output,
        resources: &GetScreenResourcesCurrentReply,
    ) -> Result<GetOutputInfoReply, ReplyError> {
        self.conn
            .randr_get_output_info(output, resources.config_timestamp)?
            .reply()
    }

    fn crtc_info(
        &self,
        crtc: randr::Crtc,
        resources: &GetScreenResourcesCurrentReply,
    ) -> Result<GetCrtcInfoReply, ReplyError> {
        self.conn
            .randr_get_crtc_info(crtc, resources.config_timestamp)?
            .reply()
    }

    fn primary_output(&self) -> Option<randr::Output> {
        let reply = self.conn.randr_get_output_primary(self.root).ok()?.reply().ok()?;
        (reply.output != x11rb::NONE).then_some(reply.output)
    }

    /// Find the connected output behind `monitor`
    fn resolve(
        &self,
        monitor: &MonitorKey,
        resources: &GetScreenResourcesCurrentReply,
    ) -> Result<ResolvedOutput, DisplayError> {
        if monitor.is_primary() {
            if let Some(output) = self.primary_output() {
                let info = self
                    .output_info(output, resources)
                    .map_err(|e| Self::query_error(monitor, e))?;
                return Ok(ResolvedOutput { output, info });
            }
        }

        for &output in &resources.outputs {
            let Ok(info) = self.output_info(output, resources) else {
                continue;
            };
            if info.connection != randr::Connection::CONNECTED {
                continue;
            }
            let matched = if monitor.is_primary() {
                // No primary set: first lit output stands in for it
                info.crtc != x11rb::NONE
            } else {
                String::from_utf8_lossy(&info.name) == monitor.as_str()
            };
            if matched {
                return Ok(ResolvedOutput { output, info });
            }
        }

        Err(Self::query_error(monitor, "no connected output with that name"))
    }

    /// Smallest screen size that fits every lit CRTC, with `changed` replaced
    fn required_screen_size(
        &self,
        resources: &GetScreenResourcesCurrentReply,
        changed: randr::Crtc,
        changed_extent: (i32, i32),
    ) -> (u16, u16) {
        let mut width = changed_extent.0;
        let mut height = changed_extent.1;
        for &crtc in &resources.crtcs {
            if crtc == changed {
                continue;
            }
            let Ok(info) = self.crtc_info(crtc, resources) else { continue };
            if info.mode == x11rb::NONE {
                continue;
            }
            width = width.max(i32::from(info.x) + i32::from(info.width));
            height = height.max(i32::from(info.y) + i32::from(info.height));
        }
        (clamp_u16(width), clamp_u16(height))
    }

    fn root_size(&self) -> Option<(u16, u16)> {
        let geometry = self.conn.get_geometry(self.root).ok()?.reply().ok()?;
        Some((geometry.width, geometry.height))
    }

    fn set_screen_size(&self, width: u16, height: u16) -> Result<(), ReplyError> {
        let mm_width = (f64::from(width) * MM_PER_INCH / self.dpi).round() as u32;
        let mm_height = (f64::from(height) * MM_PER_INCH / self.dpi).round() as u32;
        debug!(width, height, mm_width, mm_height, "Resizing X screen");
        self.conn
            .randr_set_screen_size(self.root, width, height, mm_width, mm_height)?
            .check()
    }
}

impl DisplayBackend for RandrDisplay {
    fn list_monitors(&self) -> Vec<MonitorInfo> {
        let resources = match self.resources() {
            Ok(resources) => resources,
            Err(e) => {
                warn!(error = %e, "Failed to enumerate monitors");
                return Vec::new();
            }
        };
        let primary = self.primary_output();

        let mut monitors = Vec::new();
        for &output in &resources.outputs {
            let info = match self.output_info(output, &resources) {
                Ok(info) => info,
                Err(e) => {
                    warn!(output, error = %e, "Failed to query output");
                    continue;
                }
            };
            if info.connection != randr::Connection::CONNECTED || info.crtc == x11rb::NONE {
                continue;
            }
            let name = String::from_utf8_lossy(&info.name).to_string();
            monitors.push(MonitorInfo {
                key: MonitorKey::new(name.clone()),
                display_name: name,
                is_primary: primary == Some(output),
            });
        }
        monitors
    }

    fn current_mode(&self, monitor: &MonitorKey) -> Result<Resolution, DisplayError> {
        let resources = self.resources()?;
        let resolved = self.resolve(monitor, &resources)?;
        if resolved.info.crtc == x11rb::NONE {
            return Err(Self::query_error(monitor, "output is not driving a CRTC"));
        }
        let crtc = self
            .crtc_info(resolved.info.crtc, &resources)
            .map_err(|e| Self::query_error(monitor, e))?;
        resources
            .modes
            .iter()
            .find(|m| m.id == crtc.mode)
            .map(mode_resolution)
            .ok_or_else(|| Self::query_error(monitor, format!("unknown mode id {}", crtc.mode)))
    }

    fn supported_modes(&self, monitor: &MonitorKey) -> Result<Vec<Resolution>, DisplayError> {
        let resources = self.resources()?;
        let resolved = self.resolve(monitor, &resources)?;
        let mut modes: Vec<Resolution> = resources
            .modes
            .iter()
            .filter(|m| resolved.info.modes.contains(&m.id))
            .map(mode_resolution)
            .collect();
        modes.sort_by(|a, b| {
            (b.width, b.height, b.frequency).cmp(&(a.width, a.height, a.frequency))
        });
        modes.dedup();
        Ok(modes)
    }

    fn set_mode(&self, monitor: &MonitorKey, resolution: Resolution) -> Result<(), ModeChangeError> {
        let fail = |kind, detail: String| ModeChangeError::new(monitor, resolution, kind, detail);

        let resources = self
            .resources()
            .map_err(|e| fail(ModeChangeKind::Unknown, e.to_string()))?;
        let resolved = self
            .resolve(monitor, &resources)
            .map_err(|e| fail(ModeChangeKind::Unsupported, e.to_string()))?;
        if resolved.info.crtc == x11rb::NONE {
            return Err(fail(
                ModeChangeKind::RestartRequired,
                "output is disabled; enable it before switching modes".to_string(),
            ));
        }

        let candidates: Vec<(u32, Resolution)> = resources
            .modes
            .iter()
            .filter(|m| resolved.info.modes.contains(&m.id))
            .map(|m| (m.id, mode_resolution(m)))
            .collect();
        let Some((mode_id, chosen)) = pick_mode(&candidates, &resolution) else {
            return Err(fail(
                ModeChangeKind::Unsupported,
                format!("output advertises {} modes, none match", candidates.len()),
            ));
        };

        let crtc = self
            .crtc_info(resolved.info.crtc, &resources)
            .map_err(|e| fail(classify_reply_error(&e), e.to_string()))?;

        let (w, h) = rotated_extent(chosen, crtc.rotation);
        let extent = (i32::from(crtc.x) + w, i32::from(crtc.y) + h);
        let needed = self.required_screen_size(&resources, resolved.info.crtc, extent);
        let current = self.root_size().unwrap_or(needed);
        let grown = grown_screen(current, needed);
        if let Some((width, height)) = grown {
            self.set_screen_size(width, height)
                .map_err(|e| fail(classify_reply_error(&e), format!("screen resize failed: {e}")))?;
        }

        let outputs = if crtc.outputs.is_empty() {
            vec![resolved.output]
        } else {
            crtc.outputs.clone()
        };
        let applied = self
            .conn
            .randr_set_crtc_config(
                resolved.info.crtc,
                x11rb::CURRENT_TIME,
                resources.config_timestamp,
                crtc.x,
                crtc.y,
                mode_id,
                crtc.rotation,
                &outputs,
            )
            .map_err(|e| fail(ModeChangeKind::Unknown, e.to_string()))
            .and_then(|cookie| cookie.reply().map_err(|e| fail(classify_reply_error(&e), e.to_string())))
            .and_then(|reply| match set_config_failure(reply.status) {
                Some(kind) => Err(fail(kind, format!("RandR returned status {:?}", reply.status))),
                None => Ok(()),
            });

        if let Err(e) = applied {
            // The CRTC kept its old mode, so the screen goes back to its old size
            if grown.is_some()
                && let Err(shrink) = self.set_screen_size(current.0, current.1)
            {
                warn!(monitor = %monitor, error = %shrink, "Failed to undo screen grow after mode change failure");
            }
            return Err(e);
        }

        // Give back screen area a smaller mode no longer needs
        if needed.0 < current.0 || needed.1 < current.1 {
            if let Err(e) = self.set_screen_size(needed.0, needed.1) {
                warn!(monitor = %monitor, error = %e, "Mode changed but screen shrink failed");
            }
        }

        info!(monitor = %monitor, resolution = %chosen, "Display mode applied");
        Ok(())
    }
}

/// Screen size to switch to before a mode change, if the new layout does not
/// fit in the current one
fn grown_screen(current: (u16, u16), needed: (u16, u16)) -> Option<(u16, u16)> {
    (needed.0 > current.0 || needed.1 > current.1)
        .then(|| (needed.0.max(current.0), needed.1.max(current.1)))
}

fn clamp_u16(value: i32) -> u16 {
    value.clamp(0, i32::from(u16::MAX)) as u16
}

fn mode_resolution(mode: &ModeInfo) -> Resolution {
    Resolution::new(
        u32::from(mode.width),
        u32::from(mode.height),
        refresh_hz(mode.dot_clock, mode.htotal, mode.vtotal, u32::from(mode.mode_flags)),
    )
}

/// Refresh rate in whole Hz from raw mode timings
fn refresh_hz(dot_clock: u32, htotal: u16, vtotal: u16, flags: u32) -> u32 {
    let mut vtotal = f64::from(vtotal);
    if flags & u32::from(ModeFlag::DOUBLE_SCAN) != 0 {
        vtotal *= 2.0;
    }
    if flags & u32::from(ModeFlag::INTERLACE) != 0 {
        vtotal /= 2.0;
    }
    let pixels = f64::from(htotal) * vtotal;
    if pixels <= 0.0 {
        return 0;
    }
    (f64::from(dot_clock) / pixels).round() as u32
}

/// Choose the mode serving `request`; frequency 0 picks the fastest refresh
fn pick_mode(candidates: &[(u32, Resolution)], request: &Resolution) -> Option<(u32, Resolution)> {
    candidates
        .iter()
        .filter(|(_, mode)| request.satisfied_by(mode))
        .max_by_key(|(_, mode)| mode.frequency)
        .copied()
}

fn rotated_extent(mode: Resolution, rotation: Rotation) -> (i32, i32) {
    let sideways = u16::from(rotation) & (u16::from(Rotation::ROTATE90) | u16::from(Rotation::ROTATE270)) != 0;
    let (w, h) = (mode.width as i32, mode.height as i32);
    if sideways { (h, w) } else { (w, h) }
}

fn set_config_failure(status: SetConfig) -> Option<ModeChangeKind> {
    if status == SetConfig::SUCCESS {
        None
    } else if status == SetConfig::INVALID_CONFIG_TIME || status == SetConfig::INVALID_TIME {
        Some(ModeChangeKind::DriverBusy)
    } else {
        Some(ModeChangeKind::Unknown)
    }
}

fn classify_reply_error(err: &ReplyError) -> ModeChangeKind {
    match err {
        ReplyError::X11Error(x11) => match x11.error_kind {
            ErrorKind::Access => ModeChangeKind::PermissionDenied,
            ErrorKind::Value | ErrorKind::Match => ModeChangeKind::Unsupported,
            _ => ModeChangeKind::Unknown,
        },
        ReplyError::ConnectionError(_) => ModeChangeKind::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refresh_rate_from_timings() {
        // CVT 1920x1080@60: 148.5 MHz, 2200 x 1125
        assert_eq!(refresh_hz(148_500_000, 2200, 1125, 0), 60);
        // 2560x1440@144 reduced blanking
        assert_eq!(refresh_hz(586_590_000, 2720, 1497, 0), 144);
        assert_eq!(refresh_hz(1000, 0, 1125, 0), 0);
    }

    #[test]
    fn test_refresh_rate_interlace_and_double_scan() {
        let interlace = u32::from(ModeFlag::INTERLACE);
        let double_scan = u32::from(ModeFlag::DOUBLE_SCAN);
        assert_eq!(refresh_hz(74_250_000, 2200, 1125, interlace), 60);
        assert_eq!(refresh_hz(74_250_000, 2200, 1125, 0), 30);
        assert_eq!(refresh_hz(25_175_000, 800, 525, double_scan), 30);
    }

    #[test]
    fn test_pick_mode_exact_and_wildcard() {
        let modes = vec![
            (1, Resolution::new(1920, 1080, 60)),
            (2, Resolution::new(1920, 1080, 144)),
            (3, Resolution::new(1280, 960, 75)),
        ];
        assert_eq!(pick_mode(&modes, &Resolution::new(1920, 1080, 60)), Some(modes[0]));
        assert_eq!(pick_mode(&modes, &Resolution::new(1920, 1080, 0)), Some(modes[1]));
        assert_eq!(pick_mode(&modes, &Resolution::new(1280, 960, 144)), None);
        assert_eq!(pick_mode(&modes, &Resolution::new(800, 600, 0)), None);
    }

    #[test]
    fn test_set_config_status_mapping() {
        assert_eq!(set_config_failure(SetConfig::SUCCESS), None);
        assert_eq!(set_config_failure(SetConfig::INVALID_TIME), Some(ModeChangeKind::DriverBusy));
        assert_eq!(
            set_config_failure(SetConfig::INVALID_CONFIG_TIME),
            Some(ModeChangeKind::DriverBusy)
        );
        assert_eq!(set_config_failure(SetConfig::FAILED), Some(ModeChangeKind::Unknown));
    }

    #[test]
    fn test_screen_grows_only_when_layout_does_not_fit() {
        assert_eq!(grown_screen((2560, 1440), (1280, 960)), None);
        assert_eq!(grown_screen((2560, 1440), (2560, 1440)), None);
        assert_eq!(grown_screen((1920, 1080), (2560, 1080)), Some((2560, 1080)));
        // Each axis only grows
        assert_eq!(grown_screen((3840, 1080), (2560, 1440)), Some((3840, 1440)));
    }

    #[test]
    fn test_rotated_extent_swaps_for_portrait() {
        let mode = Resolution::new(2560, 1440, 144);
        assert_eq!(rotated_extent(mode, Rotation::ROTATE0), (2560, 1440));
        assert_eq!(rotated_extent(mode, Rotation::ROTATE90), (1440, 2560));
        assert_eq!(rotated_extent(mode, Rotation::ROTATE270), (1440, 2560));
    }
}
