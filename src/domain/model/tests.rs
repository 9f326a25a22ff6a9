// Unit tests for domain models

use super::*;

#[test]
fn test_media_time_compares_across_timescales() {
    let a = MediaTime::new(90_000, 90_000);
    let b = MediaTime::from_millis(1000);
    assert_eq!(a, b);
    assert!(MediaTime::new(44_101, 44_100) > b);
    assert!(MediaTime::new(2, 3) < MediaTime::from_millis(667));
    assert_eq!(MediaTime::new(1, 3).as_millis(), 333);
}

#[test]
fn test_media_time_zero_timescale() {
    let t = MediaTime::new(5, 0);
    assert_eq!(t.timescale(), 1);
    assert_eq!(t.as_millis(), 5000);
}

#[test]
fn test_trim_range_rejects_empty() {
    assert!(TrimRange::new(1000, 1000).is_err());
    assert!(TrimRange::new(2000, 1000).is_err());
}

#[test]
fn test_trim_range_correction() {
    let range = TrimRange::new(2500, 5500).unwrap();
    assert!(!range.is_corrected());
    assert_eq!(range.start(), MediaTime::from_millis(2500));

    let corrected = range.with_correction(MediaTime::new(2, 1), MediaTime::new(6, 1));
    assert!(corrected.is_corrected());
    assert_eq!(corrected.start().as_millis(), 2000);
    assert_eq!(corrected.end().as_millis(), 6000);
    assert_eq!(corrected.duration_ms(), 3000);
}

#[test]
fn test_crop_rect_parse_and_bounds() {
    let rect: CropRect = "10, 20, 300, 200".parse().unwrap();
    assert_eq!(rect, CropRect::new(10, 20, 300, 200));
    assert!(rect.fits_within(Dimensions::new(310, 220)));
    assert!(!rect.fits_within(Dimensions::new(309, 220)));
    assert!(!CropRect::new(0, 0, 0, 10).fits_within(Dimensions::new(10, 10)));
    assert_eq!(rect.to_filter(), "crop=300:200:10:20");
    assert!("1,2,3".parse::<CropRect>().is_err());
}

#[test]
fn test_dimensions_parse() {
    let dims: Dimensions = "1280x720".parse().unwrap();
    assert_eq!(dims, Dimensions::new(1280, 720));
    assert_eq!(dims.transposed(), Dimensions::new(720, 1280));
    assert!("1280".parse::<Dimensions>().is_err());
}

#[test]
fn test_rotation_from_degrees() {
    assert_eq!(Rotation::from_degrees(-90).unwrap(), Rotation::Cw270);
    assert_eq!(Rotation::from_degrees(450).unwrap(), Rotation::Cw90);
    assert!(Rotation::from_degrees(45).is_err());
    assert!(Rotation::Cw270.transposes());
    assert!(!Rotation::Cw180.transposes());
}

#[test]
fn test_video_quality_parse() {
    assert_eq!("very-high".parse::<VideoQuality>().unwrap(), VideoQuality::VeryHigh);
    assert_eq!("Very_High".parse::<VideoQuality>().unwrap(), VideoQuality::VeryHigh);
    assert_eq!("low".parse::<VideoQuality>().unwrap(), VideoQuality::Low);
    assert!("ultra".parse::<VideoQuality>().is_err());
    assert_eq!(VideoQuality::default(), VideoQuality::Medium);
}

#[test]
fn test_metadata_defaults() {
    let meta = MediaMetadata {
        duration_ms: 10_000,
        dimensions: Dimensions::new(1920, 1080),
        rotation: Rotation::Cw90,
        frame_rate: None,
        bitrate: Some(0),
    };
    assert_eq!(meta.frame_rate_or_default(), DEFAULT_FRAME_RATE);
    assert_eq!(meta.bitrate_or_default(), DEFAULT_BITRATE);
    assert_eq!(meta.display_dimensions(), Dimensions::new(1080, 1920));
    assert_eq!(meta.total_frames(), 240.0);
}

#[test]
fn test_operation_expected_duration() {
    let range = TrimRange::new(1000, 4000).unwrap();
    assert_eq!(EncodeOperation::Trim { range }.expected_duration_ms(), 3000);
    let compress = EncodeOperation::Compress {
        size: Dimensions::new(640, 360),
        bitrate_mbps: 1.0,
        duration_ms: 8000,
    };
    assert_eq!(compress.expected_duration_ms(), 8000);
    assert_eq!(compress.name(), "compress");
}
