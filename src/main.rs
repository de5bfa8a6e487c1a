//! # imgBot 媒体流水线 — probe 诊断入口
//!
//! 对单个 URL 跑一遍完整流水线并打印结果摘要，用于排查“某张图为什么发不出去”。
//! 业务逻辑分布在库的各子模块中，详见 `lib.rs` 架构文档。
//!
//! 用法：`imgbot-probe <url> [config.json]`

use std::path::Path;
use std::process::ExitCode;

use imgbot_media::image_handler::{ImageHandler, ImageVariant, PipelineConfig};

fn print_summary(variant: &ImageVariant) {
    match variant {
        ImageVariant::Still(still) => {
            println!("kind: still");
            println!("size: {}x{}", still.width(), still.height());
            println!("rgba bytes: {}", still.pixels().len());
        }
        ImageVariant::Animated(animated) => {
            let total_centis: u32 = animated
                .frames()
                .iter()
                .map(|frame| u32::from(frame.delay_centis()))
                .sum();
            println!("kind: animated");
            println!("size: {}x{}", animated.width(), animated.height());
            println!("frames: {}", animated.frame_count());
            println!("duration: {:.2}s", total_centis as f32 / 100.0);
            match animated.loop_count() {
                Some(0) => println!("loop: forever"),
                Some(n) => println!("loop: {}", n),
                None => println!("loop: once"),
            }
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut args = std::env::args().skip(1);
    let Some(url) = args.next() else {
        eprintln!("用法: imgbot-probe <url> [config.json]");
        return ExitCode::from(2);
    };

    let mut config = match args.next() {
        Some(path) => PipelineConfig::load_from_path(Path::new(&path)),
        None => PipelineConfig::default(),
    };
    config.apply_env_overrides();

    let handler = match ImageHandler::new(config) {
        Ok(handler) => handler,
        Err(err) => {
            log::error!("❌ 配置无效: {err}");
            return ExitCode::from(2);
        }
    };

    match handler.fetch_and_decode(&url).await {
        Ok(variant) => {
            print_summary(&variant);
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("error[{}] stage={}: {}", err.code(), err.stage(), err);
            ExitCode::FAILURE
        }
    }
}
