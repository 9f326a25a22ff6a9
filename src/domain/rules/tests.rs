// Unit tests for business rules

use super::*;

fn metadata(width: u32, height: u32, rotation: Rotation) -> MediaMetadata {
    MediaMetadata {
        duration_ms: 10_000,
        dimensions: Dimensions::new(width, height),
        rotation,
        frame_rate: Some(30.0),
        bitrate: Some(8_000_000),
    }
}

#[test]
fn test_crop_maps_player_space_to_source() {
    let mapped = CropMapper::map_to_source(
        CropRect::new(100, 50, 200, 150),
        Dimensions::new(800, 450),
        &metadata(1920, 1080, Rotation::None),
    )
    .unwrap();
    assert_eq!(mapped, CropRect::new(240, 120, 480, 360));
    assert!(mapped.fits_within(Dimensions::new(1920, 1080)));
}

#[test]
fn test_crop_rotation_transposes_source() {
    // Portrait display of a landscape-coded stream
    let mapped = CropMapper::map_to_source(
        CropRect::new(0, 0, 225, 400),
        Dimensions::new(450, 800),
        &metadata(1920, 1080, Rotation::Cw90),
    )
    .unwrap();
    assert_eq!(mapped, CropRect::new(0, 0, 540, 960));
}

#[test]
fn test_crop_is_clamped_into_bounds() {
    let mapped = CropMapper::map_to_source(
        CropRect::new(700, 400, 300, 300),
        Dimensions::new(800, 450),
        &metadata(1920, 1080, Rotation::None),
    )
    .unwrap();
    assert_eq!(mapped.x, 1680);
    assert_eq!(mapped.y, 960);
    assert_eq!(mapped.width, 240);
    assert_eq!(mapped.height, 120);
    assert!(mapped.fits_within(Dimensions::new(1920, 1080)));
}

#[test]
fn test_crop_rejects_degenerate_input() {
    let meta = metadata(1920, 1080, Rotation::None);
    assert!(CropMapper::map_to_source(CropRect::new(0, 0, 10, 10), Dimensions::new(0, 450), &meta).is_err());
    assert!(CropMapper::map_to_source(CropRect::new(800, 0, 10, 10), Dimensions::new(800, 450), &meta).is_err());
    assert!(CropMapper::validate(CropRect::new(1900, 0, 40, 10), &meta).is_err());
    assert!(CropMapper::validate(CropRect::new(1880, 0, 40, 10), &meta).is_ok());
}

#[test]
fn test_bitrate_policy() {
    assert_eq!(BitratePolicy::target_mbps(500_000, VideoQuality::VeryHigh), 1.0);
    assert!((BitratePolicy::target_mbps(10_000_000, VideoQuality::Low) - 2.0).abs() < 1e-9);
    assert!((BitratePolicy::target_mbps(10_000_000, VideoQuality::VeryHigh) - 6.0).abs() < 1e-9);

    let mut meta = metadata(1920, 1080, Rotation::None);
    meta.bitrate = None;
    // 1.5 Mbit/s default
    assert!((BitratePolicy::for_metadata(&meta, VideoQuality::High) - 0.6).abs() < 1e-9);
}

#[test]
fn test_initial_selection() {
    assert_eq!(SelectionPolicy::initial(60_000, None, Some(10_000)), Selection::new(25_000, 35_000));
    assert_eq!(SelectionPolicy::initial(800, Some(1000), None), Selection::new(0, 800));
    assert_eq!(SelectionPolicy::initial(5000, Some(1000), Some(10_000)), Selection::new(0, 5000));
}

#[test]
fn test_widen_prefers_extending_end() {
    // Tail of 5000 ms covers the 700 ms shortfall
    let widened = SelectionPolicy::widen_to_minimum(Selection::new(4000, 4300), 10_000, 1000);
    assert_eq!(widened, Selection::new(4000, 5000));
}

#[test]
fn test_widen_falls_back_to_start() {
    // Tail of 200 ms is too short, so the start moves back instead
    let widened = SelectionPolicy::widen_to_minimum(Selection::new(9000, 9800), 10_000, 1000);
    assert_eq!(widened, Selection::new(8800, 9800));
}

#[test]
fn test_widen_requires_strict_room() {
    // Tail equals the shortfall and start equals the shortfall: nothing moves
    let selection = Selection::new(500, 1000);
    assert_eq!(SelectionPolicy::widen_to_minimum(selection, 1500, 1000), selection);
    assert_eq!(
        SelectionPolicy::widen_to_minimum(Selection::new(0, 2000), 3000, 1000),
        Selection::new(0, 2000)
    );
}
