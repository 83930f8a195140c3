use super::*;

use serde_json::json;

use crate::test_support::{png_bytes, MemoryAssets};

fn resolver(assets: MemoryAssets, device_pixel_ratio: f64) -> ImageResolver {
    ImageResolver::new(Arc::new(assets), device_pixel_ratio)
}

#[test]
fn list_form_accepts_numeric_strings() {
    assert_eq!(
        ImageSpec::from_value(&json!(["defaultMarker"])).expect("default"),
        ImageSpec::DefaultMarker
    );
    assert_eq!(
        ImageSpec::from_value(&json!(["fromAsset", "pin.png", "2"])).expect("scaled asset"),
        ImageSpec::FromAsset {
            path: "pin.png".into(),
            scale: Some(2.0)
        }
    );
    assert_eq!(
        ImageSpec::from_value(&json!(["fromAssetImage", "pin.png", "32", 48])).expect("fit"),
        ImageSpec::FromAssetImage {
            path: "pin.png".into(),
            size: Some(AssetImageSize::Fit {
                width: 32.0,
                height: 48.0
            })
        }
    );
}

#[test]
fn object_form_names_its_variant() {
    let spec = ImageSpec::from_value(&json!({
        "type": "fromAssetImage",
        "path": "pin.png",
        "scale": 0.5
    }))
    .expect("object form");
    assert_eq!(
        spec,
        ImageSpec::FromAssetImage {
            path: "pin.png".into(),
            size: Some(AssetImageSize::Scale(0.5))
        }
    );

    let err = ImageSpec::from_value(&json!({"type": "fromAssetImage", "path": "a", "width": 3}))
        .expect_err("width without height");
    assert!(matches!(err, BridgeError::AssetResolution(_)));
}

#[test]
fn malformed_specs_are_asset_errors() {
    for value in [
        json!([]),
        json!(["fromSpace"]),
        json!(["fromAsset"]),
        json!(["fromAsset", "  "]),
        json!(["fromAssetImage", "pin.png", "wide", 4]),
        json!({"path": "pin.png"}),
        json!("pin.png"),
    ] {
        let err = ImageSpec::from_value(&value).expect_err("malformed");
        assert!(
            matches!(err, BridgeError::AssetResolution(_)),
            "{value} gave {err:?}"
        );
    }
}

#[test]
fn fit_keeps_aspect_ratio_and_truncates() {
    assert_eq!(fit_dimensions(40, 20, 10.0, 10.0), Some((10, 5)));
    assert_eq!(fit_dimensions(32, 32, 8.0, 16.0), Some((8, 8)));
    assert_eq!(fit_dimensions(3, 8, 2.0, 2.0), Some((1, 2)));
    assert_eq!(fit_dimensions(1024, 1, 8.0, 8.0), Some((8, 1)));
    assert_eq!(fit_dimensions(0, 10, 10.0, 10.0), None);
    assert_eq!(fit_dimensions(10, 10, 0.0, 10.0), None);
    assert_eq!(fit_dimensions(10, 10, f64::NAN, 10.0), None);
}

#[test]
fn scale_truncates_to_whole_pixels() {
    assert_eq!(scaled_dimensions(40, 20, 0.5), Some((20, 10)));
    assert_eq!(scaled_dimensions(5, 5, 0.3), Some((1, 1)));
    assert_eq!(scaled_dimensions(5, 5, -1.0), None);
    assert_eq!(scaled_dimensions(5, 5, f64::INFINITY), None);
}

#[test]
fn sizes_above_the_icon_limit_are_rejected() {
    assert_eq!(scaled_dimensions(40, 20, 1e9), None);
    assert_eq!(scaled_dimensions(1, 1, f64::from(MAX_ICON_SIDE)), Some((2048, 2048)));
    assert_eq!(scaled_dimensions(1, 1, f64::from(MAX_ICON_SIDE) + 1.0), None);
    assert_eq!(fit_dimensions(40, 20, 1e7, 1e7), None);
    assert_eq!(fit_dimensions(1, 2, 4096.0, 4096.0), None);
    assert_eq!(fit_dimensions(2, 1, 2048.0, 2048.0), Some((2048, 1024)));
}

#[tokio::test]
async fn oversized_requests_fail_resolution() {
    let images = resolver(
        MemoryAssets::default().with("pin.png", png_bytes(40, 20)),
        1.0,
    );
    for spec in [
        ImageSpec::FromAsset {
            path: "pin.png".into(),
            scale: Some(1e9),
        },
        ImageSpec::FromAssetImage {
            path: "pin.png".into(),
            size: Some(AssetImageSize::Scale(1e9)),
        },
        ImageSpec::FromAssetImage {
            path: "pin.png".into(),
            size: Some(AssetImageSize::Fit {
                width: 1e7,
                height: 1e7,
            }),
        },
    ] {
        let err = images.resolve(&spec).await.expect_err("too large");
        assert!(matches!(err, BridgeError::AssetResolution(_)), "{spec:?} gave {err:?}");
    }
}

#[tokio::test]
async fn resolver_applies_scale_fit_and_pixel_ratio() {
    let assets = || MemoryAssets::default().with("pin.png", png_bytes(40, 20));

    let plain = resolver(assets(), 1.0);
    let icon = plain
        .resolve(&ImageSpec::FromAsset {
            path: "pin.png".into(),
            scale: None,
        })
        .await
        .expect("plain");
    assert_eq!(icon.dimensions(), Some((40, 20)));

    let icon = plain
        .resolve(&ImageSpec::FromAssetImage {
            path: "pin.png".into(),
            size: Some(AssetImageSize::Scale(0.25)),
        })
        .await
        .expect("scaled");
    assert_eq!(icon.dimensions(), Some((10, 5)));

    let dense = resolver(assets(), 2.0);
    let icon = dense
        .resolve(&ImageSpec::FromAssetImage {
            path: "pin.png".into(),
            size: Some(AssetImageSize::Fit {
                width: 10.0,
                height: 10.0,
            }),
        })
        .await
        .expect("fit");
    assert_eq!(icon.dimensions(), Some((20, 10)));

    assert_eq!(
        dense
            .resolve(&ImageSpec::DefaultMarker)
            .await
            .expect("default"),
        ResolvedIcon::Default
    );
}

#[tokio::test]
async fn missing_or_undecodable_assets_fail() {
    let assets = MemoryAssets::default().with("broken.png", b"not a png".to_vec());
    let images = resolver(assets, 1.0);

    for path in ["absent.png", "broken.png"] {
        let err = images
            .resolve(&ImageSpec::FromAsset {
                path: path.into(),
                scale: None,
            })
            .await
            .expect_err("unusable asset");
        match err {
            BridgeError::AssetResolution(message) => assert!(message.contains(path)),
            other => panic!("unexpected error {other:?}"),
        }
    }
}

#[tokio::test]
async fn filesystem_assets_stay_under_the_root() {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::create_dir_all(dir.path().join("icons")).expect("mkdir");
    std::fs::write(dir.path().join("icons/pin.png"), png_bytes(12, 6)).expect("write asset");

    let files = FsAssetResolver::new(dir.path());
    assert_eq!(files.root(), dir.path());
    assert!(files.load("icons/pin.png").await.is_ok());
    assert!(files.load("./icons/pin.png").await.is_ok());
    assert!(files.load("../pin.png").await.is_err());
    assert!(files.load("icons/../../pin.png").await.is_err());
    assert!(files.load("/etc/hostname").await.is_err());

    let images = ImageResolver::new(Arc::new(files), 1.0);
    let icon = images
        .resolve(&ImageSpec::FromAssetImage {
            path: "icons/pin.png".into(),
            size: Some(AssetImageSize::Fit {
                width: 6.0,
                height: 6.0,
            }),
        })
        .await
        .expect("fit from disk");
    assert_eq!(icon.dimensions(), Some((6, 3)));
}
