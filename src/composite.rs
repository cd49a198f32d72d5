//! Layer compositing: premultiplied source-over pixel math plus the two
//! composite modes (final and edit-preview).

use std::collections::BTreeSet;

use crate::{assets::ImageCache, model::Manifest, surface::Surface};

/// Opacity applied in edit mode to layers outside the highlighted subset.
pub const EDIT_DIM_OPACITY: f32 = 0.5;

pub type PremulRgba8 = [u8; 4];

/// Premultiplied source-over blend of one pixel with uniform extra opacity.
pub fn over(dst: PremulRgba8, src: PremulRgba8, opacity: f32) -> PremulRgba8 {
    let opacity = opacity.clamp(0.0, 1.0);
    if opacity <= 0.0 || src[3] == 0 {
        return dst;
    }

    let op = ((opacity * 255.0).round() as i32).clamp(0, 255) as u16;
    let sa = mul_div255(u16::from(src[3]), op);
    if sa == 0 {
        return dst;
    }

    let inv = 255u16 - u16::from(sa);

    let mut out = [0u8; 4];
    out[3] = add_sat_u8(sa, mul_div255(u16::from(dst[3]), inv));

    for i in 0..3 {
        let sc = mul_div255(u16::from(src[i]), op);
        let dc = mul_div255(u16::from(dst[i]), inv);
        out[i] = add_sat_u8(sc, dc);
    }
    out
}

fn mul_div255(x: u16, y: u16) -> u8 {
    (((u32::from(x) * u32::from(y)) + 127) / 255) as u8
}

fn add_sat_u8(a: u8, b: u8) -> u8 {
    a.saturating_add(b)
}

/// Final composite: clear, then draw only enabled layers in manifest order at
/// full opacity. Layers without a cached image are skipped; never mutates the
/// choice table.
pub fn composite_final(
    surface: &mut Surface,
    manifest: &Manifest,
    images: &ImageCache,
    enabled_layers: &BTreeSet<String>,
) {
    surface.clear();
    for layer in &manifest.layers {
        if !enabled_layers.contains(&layer.file_name) {
            continue;
        }
        if let Some(image) = images.get(&layer.file_name) {
            surface.draw_image(image, 1.0);
        }
    }
}

/// Edit-preview composite: clear, then draw every layer in manifest order.
/// With a highlighted subset, layers outside it are dimmed to visually
/// distinguish the currently edited selection; without one, everything draws
/// at full opacity.
pub fn composite_edit(
    surface: &mut Surface,
    manifest: &Manifest,
    images: &ImageCache,
    highlighted: Option<&[String]>,
) {
    surface.clear();
    for layer in &manifest.layers {
        let Some(image) = images.get(&layer.file_name) else {
            continue;
        };
        let opacity = match highlighted {
            Some(names) if !names.iter().any(|n| n == &layer.file_name) => EDIT_DIM_OPACITY,
            _ => 1.0,
        };
        surface.draw_image(image, opacity);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{assets::PreparedImage, model::Layer};

    #[test]
    fn over_opacity_0_is_noop() {
        let dst = [1, 2, 3, 4];
        let src = [200, 200, 200, 200];
        assert_eq!(over(dst, src, 0.0), dst);
    }

    #[test]
    fn over_src_alpha_0_is_noop() {
        let dst = [10, 20, 30, 40];
        let src = [255, 255, 255, 0];
        assert_eq!(over(dst, src, 1.0), dst);
    }

    #[test]
    fn over_src_opaque_replaces_dst() {
        let dst = [0, 0, 0, 255];
        let src = [255, 0, 0, 255];
        assert_eq!(over(dst, src, 1.0), src);
    }

    #[test]
    fn over_dst_transparent_returns_scaled_src() {
        let dst = [0, 0, 0, 0];
        let src = [100, 110, 120, 200];
        assert_eq!(over(dst, src, 1.0), src);
    }

    fn solid(px: [u8; 4]) -> PreparedImage {
        PreparedImage {
            width: 1,
            height: 1,
            rgba8_premul: Arc::new(px.to_vec()),
        }
    }

    fn one_px_setup() -> (Surface, Manifest, ImageCache) {
        let manifest = Manifest {
            width: 1,
            height: 1,
            layers: vec![
                Layer { file_name: "bottom.png".to_string() },
                Layer { file_name: "top.png".to_string() },
            ],
            ..Default::default()
        };
        let mut images = ImageCache::new();
        images.insert("bottom.png".to_string(), solid([0, 255, 0, 255]));
        images.insert("top.png".to_string(), solid([255, 0, 0, 255]));
        (Surface::new(1, 1), manifest, images)
    }

    #[test]
    fn final_draws_enabled_in_manifest_order() {
        let (mut surface, manifest, images) = one_px_setup();
        let all: BTreeSet<String> =
            ["bottom.png".to_string(), "top.png".to_string()].into_iter().collect();
        composite_final(&mut surface, &manifest, &images, &all);
        assert_eq!(surface.data(), &[255, 0, 0, 255]);

        let bottom_only: BTreeSet<String> = ["bottom.png".to_string()].into_iter().collect();
        composite_final(&mut surface, &manifest, &images, &bottom_only);
        assert_eq!(surface.data(), &[0, 255, 0, 255]);
    }

    #[test]
    fn final_skips_missing_images() {
        let (mut surface, mut manifest, images) = one_px_setup();
        manifest.layers.push(Layer { file_name: "missing.png".to_string() });
        let enabled: BTreeSet<String> =
            ["bottom.png".to_string(), "missing.png".to_string()].into_iter().collect();
        composite_final(&mut surface, &manifest, &images, &enabled);
        assert_eq!(surface.data(), &[0, 255, 0, 255]);
    }

    #[test]
    fn edit_draws_everything_and_dims_unhighlighted() {
        let (mut surface, manifest, images) = one_px_setup();
        composite_edit(&mut surface, &manifest, &images, None);
        assert_eq!(surface.data(), &[255, 0, 0, 255]);

        composite_edit(
            &mut surface,
            &manifest,
            &images,
            Some(&["bottom.png".to_string()]),
        );
        // Top layer drawn at half opacity over the opaque bottom layer.
        let px = surface.data();
        assert!(px[0] > 100 && px[0] < 160, "red ~half: {px:?}");
        assert!(px[1] > 100 && px[1] < 160, "green ~half: {px:?}");
        assert_eq!(px[3], 255);
    }
}
