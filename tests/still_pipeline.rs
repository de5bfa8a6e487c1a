// Still-image decoding and the fetch → decode path through the public API
use std::io::{Cursor, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;

use image::{DynamicImage, GrayImage, ImageFormat as CodecFormat, Luma, Rgba, RgbaImage};
use imgbot_media::image_handler::{
    DecodeError, FetchError, FetchOptions, FetchedBytes, ImageFormat, ImageHandler, ImageKind,
    PipelineConfig, decode_still, sniff, to_animated, to_still,
};
use imgbot_media::PipelineError;

fn encode(image: DynamicImage, format: CodecFormat) -> Vec<u8> {
    let mut cursor = Cursor::new(Vec::new());
    image.write_to(&mut cursor, format).expect("failed to encode test image");
    cursor.into_inner()
}

fn gradient_png(width: u32, height: u32) -> Vec<u8> {
    let img = RgbaImage::from_fn(width, height, |x, y| {
        Rgba([(x % 255) as u8, (y % 255) as u8, ((x + y) % 255) as u8, 200])
    });
    encode(DynamicImage::ImageRgba8(img), CodecFormat::Png)
}

/// 单连接 HTTP 服务，读完请求头后回写固定响应。
fn serve_once(body: Vec<u8>) -> (String, thread::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind test server failed");
    let addr = listener.local_addr().expect("read local addr failed");

    let server = thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("accept failed");
        drain_request(&mut stream);
        let header = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: image/png\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            body.len()
        );
        let _ = stream.write_all(header.as_bytes());
        let _ = stream.write_all(&body);
        let _ = stream.flush();
    });

    (format!("http://{}/image.png", addr), server)
}

fn drain_request(stream: &mut TcpStream) {
    let mut request = Vec::new();
    let mut buf = [0u8; 1024];
    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
        match stream.read(&mut buf) {
            Ok(0) | Err(_) => break,
            Ok(n) => request.extend_from_slice(&buf[..n]),
        }
    }
}

#[test]
fn png_fixture_keeps_dimensions_and_rgba_layout() {
    for (width, height) in [(1, 1), (7, 3), (64, 48)] {
        let png = gradient_png(width, height);
        assert_eq!(sniff(&png), ImageFormat::Png);

        let still = decode_still(&png, ImageFormat::Png).expect("png decode");
        assert_eq!((still.width(), still.height()), (width, height));
        assert_eq!(still.pixels().len(), (width * height * 4) as usize);
    }

    let still = decode_still(&gradient_png(7, 3), ImageFormat::Png).expect("png decode");
    // pixel (5, 2): r = 5, g = 2, b = 7, a = 200
    let offset = (2 * 7 + 5) * 4;
    assert_eq!(&still.pixels()[offset..offset + 4], &[5, 2, 7, 200]);
}

#[test]
fn grayscale_png_expands_to_opaque_rgba() {
    let gray = GrayImage::from_fn(4, 2, |x, _| Luma([(x * 60) as u8]));
    let png = encode(DynamicImage::ImageLuma8(gray), CodecFormat::Png);

    let still = decode_still(&png, ImageFormat::Png).expect("png decode");

    assert_eq!(&still.pixels()[4..8], &[60, 60, 60, 255]);
    assert!(still.pixels().chunks(4).all(|px| px[3] == 255));
}

#[test]
fn jpeg_fixture_decodes_to_opaque_rgba() {
    let img = RgbaImage::from_pixel(10, 6, Rgba([90, 140, 200, 255]));
    let jpeg = encode(DynamicImage::ImageRgba8(img).to_rgb8().into(), CodecFormat::Jpeg);
    assert_eq!(sniff(&jpeg), ImageFormat::Jpeg);

    let still = decode_still(&jpeg, ImageFormat::Jpeg).expect("jpeg decode");

    assert_eq!((still.width(), still.height()), (10, 6));
    assert_eq!(still.pixels().len(), 10 * 6 * 4);
    assert!(still.pixels().chunks(4).all(|px| px[3] == 255));
}

#[test]
fn truncated_png_is_reported() {
    let png = gradient_png(16, 16);

    assert!(matches!(
        decode_still(&png[..png.len() - 20], ImageFormat::Png),
        Err(DecodeError::Truncated(_))
    ));
}

#[test]
fn decode_fetched_wraps_still_variant() {
    let fetched = FetchedBytes::from_bytes(gradient_png(5, 5), "file://fixture.png");

    let variant = ImageHandler::decode_fetched(&fetched, &Default::default()).expect("decode");

    assert_eq!(variant.kind(), ImageKind::Still);
    assert_eq!(variant.frame_count(), 1);
    assert!(to_animated(variant.clone()).is_err());
    assert_eq!(to_still(variant).expect("still").width(), 5);
}

#[tokio::test]
async fn fetch_and_decode_png_over_http() {
    let (url, server) = serve_once(gradient_png(12, 9));
    let handler = ImageHandler::new(PipelineConfig {
        fetch: FetchOptions {
            allow_private_network: true,
            ..FetchOptions::default()
        },
        ..PipelineConfig::default()
    })
    .expect("handler init failed");

    let variant = handler.fetch_and_decode(&url).await.expect("pipeline should succeed");
    server.join().expect("server thread panicked");

    let still = to_still(variant).expect("png is still");
    assert_eq!((still.width(), still.height()), (12, 9));
    assert_eq!(still.into_pixels().len(), 12 * 9 * 4);
}

#[tokio::test]
async fn default_config_refuses_loopback_targets() {
    let err = imgbot_media::fetch_and_decode("http://127.0.0.1:9/secret.png")
        .await
        .expect_err("loopback must be refused");

    assert!(matches!(err, PipelineError::Fetch(FetchError::Forbidden(_))));
    assert_eq!(err.code(), "E_FETCH_FORBIDDEN");
}

#[test]
fn html_error_page_is_unsupported_format() {
    let fetched = FetchedBytes::from_bytes(
        &b"<html><head><title>404</title></head></html>"[..],
        "https://cdn.example.com/missing.gif",
    );

    let err = ImageHandler::decode_fetched(&fetched, &Default::default())
        .expect_err("html is not an image");

    assert!(matches!(err, PipelineError::UnsupportedFormat { detected: Some("text/html") }));
    assert_eq!(err.stage(), "sniff");
}
