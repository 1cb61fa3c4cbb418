//! Region capture from the desktop.
//!
//! On Windows this copies the requested rectangle out of the desktop DC with
//! GDI `BitBlt`. Rectangles hanging off the edge of the virtual screen are
//! clamped; rectangles entirely off-screen are `OutOfBounds`.

use image::RgbaImage;

use super::region::Region;
use crate::error::CaptureError;

/// Grabs rectangles of the screen as RGBA images.
pub trait RegionCapturer {
    fn capture(&self, region: &Region) -> Result<RgbaImage, CaptureError>;

    /// The whole capturable area, if known.
    fn screen_bounds(&self) -> Option<Region> {
        None
    }
}

/// Captures from the live desktop.
#[derive(Debug, Default, Clone, Copy)]
pub struct ScreenCapturer;

impl ScreenCapturer {
    pub fn new() -> Self {
        Self
    }
}

impl RegionCapturer for ScreenCapturer {
    fn capture(&self, region: &Region) -> Result<RgbaImage, CaptureError> {
        let bounds = self.screen_bounds().ok_or(CaptureError::Unavailable)?;
        let clamped = region
            .intersect(&bounds)
            .ok_or(CaptureError::OutOfBounds {
                x: region.x,
                y: region.y,
                width: region.width,
                height: region.height,
            })?;
        platform::grab(&clamped)
    }

    fn screen_bounds(&self) -> Option<Region> {
        platform::virtual_screen()
    }
}

#[cfg(windows)]
mod platform {
    use image::RgbaImage;
    use windows::Win32::Foundation::HWND;
    use windows::Win32::Graphics::Gdi::{
        BI_RGB, BITMAPINFO, BITMAPINFOHEADER, BitBlt, CAPTUREBLT, CreateCompatibleBitmap,
        CreateCompatibleDC, DIB_RGB_COLORS, DeleteDC, DeleteObject, GetDC, GetDIBits, HGDIOBJ,
        ROP_CODE, ReleaseDC, SRCCOPY, SelectObject,
    };
    use windows::Win32::UI::WindowsAndMessaging::{
        GetSystemMetrics, SM_CXVIRTUALSCREEN, SM_CYVIRTUALSCREEN, SM_XVIRTUALSCREEN,
        SM_YVIRTUALSCREEN,
    };

    use crate::capture::region::Region;
    use crate::error::CaptureError;

    /// Bounding box of all monitors.
    pub fn virtual_screen() -> Option<Region> {
        let (x, y, w, h) = unsafe {
            (
                GetSystemMetrics(SM_XVIRTUALSCREEN),
                GetSystemMetrics(SM_YVIRTUALSCREEN),
                GetSystemMetrics(SM_CXVIRTUALSCREEN),
                GetSystemMetrics(SM_CYVIRTUALSCREEN),
            )
        };
        if w <= 0 || h <= 0 {
            return None;
        }
        Some(Region::new(x, y, w as u32, h as u32))
    }

    pub fn grab(region: &Region) -> Result<RgbaImage, CaptureError> {
        let width = region.width as i32;
        let height = region.height as i32;
        let mut buffer = vec![0u8; region.width as usize * region.height as usize * 4];

        let (blit, lines) = unsafe {
            let screen_dc = GetDC(HWND::default());
            if screen_dc.is_invalid() {
                return Err(CaptureError::Backend("GetDC failed".to_string()));
            }
            let mem_dc = CreateCompatibleDC(screen_dc);
            let bitmap = CreateCompatibleBitmap(screen_dc, width, height);
            let previous = SelectObject(mem_dc, HGDIOBJ(bitmap.0));

            let blit = BitBlt(
                mem_dc,
                0,
                0,
                width,
                height,
                screen_dc,
                region.x,
                region.y,
                ROP_CODE(SRCCOPY.0 | CAPTUREBLT.0),
            );

            // Negative height asks for a top-down DIB
            let mut info = BITMAPINFO {
                bmiHeader: BITMAPINFOHEADER {
                    biSize: std::mem::size_of::<BITMAPINFOHEADER>() as u32,
                    biWidth: width,
                    biHeight: -height,
                    biPlanes: 1,
                    biBitCount: 32,
                    biCompression: BI_RGB.0,
                    ..Default::default()
                },
                ..Default::default()
            };
            let lines = GetDIBits(
                mem_dc,
                bitmap,
                0,
                height as u32,
                Some(buffer.as_mut_ptr() as *mut _),
                &mut info,
                DIB_RGB_COLORS,
            );

            SelectObject(mem_dc, previous);
            let _ = DeleteObject(HGDIOBJ(bitmap.0));
            let _ = DeleteDC(mem_dc);
            ReleaseDC(HWND::default(), screen_dc);
            (blit, lines)
        };

        blit.map_err(|e| CaptureError::Backend(format!("BitBlt failed: {}", e)))?;
        if lines == 0 {
            return Err(CaptureError::Backend("GetDIBits returned no lines".to_string()));
        }

        // BGRA -> RGBA, GDI leaves alpha undefined
        for px in buffer.chunks_exact_mut(4) {
            px.swap(0, 2);
            px[3] = 255;
        }

        RgbaImage::from_raw(region.width, region.height, buffer)
            .ok_or_else(|| CaptureError::Backend("capture buffer size mismatch".to_string()))
    }
}

#[cfg(not(windows))]
mod platform {
    use image::RgbaImage;

    use crate::capture::region::Region;
    use crate::error::CaptureError;

    pub fn virtual_screen() -> Option<Region> {
        None
    }

    pub fn grab(_region: &Region) -> Result<RgbaImage, CaptureError> {
        Err(CaptureError::Unavailable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_never_panics() {
        // On a headless host this is Unavailable; on a desktop it is an image.
        let capturer = ScreenCapturer::new();
        match capturer.capture(&Region::new(0, 0, 8, 8)) {
            Ok(img) => assert_eq!(img.dimensions(), (8, 8)),
            Err(CaptureError::Unavailable) | Err(CaptureError::Backend(_)) => {}
            Err(e) => panic!("unexpected capture error: {}", e),
        }
    }

    #[test]
    fn test_offscreen_region_is_rejected() {
        let capturer = ScreenCapturer::new();
        let Some(bounds) = capturer.screen_bounds() else {
            return;
        };
        let region = Region::new(bounds.right() + 100, bounds.y, 10, 10);
        assert!(matches!(
            capturer.capture(&region),
            Err(CaptureError::OutOfBounds { .. })
        ));
    }
}
