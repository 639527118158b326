use std::path::Path;
use std::time::Duration;

use framecmp::media::MediaFrame;
use framecmp::render::{BackendKind, ViewMode};
use framecmp::server::ParityOutcome;
use framecmp::session::StatsReport;

pub fn format_duration(d: Duration) -> String {
    let ms = d.as_millis();
    if ms < 1000 {
        format!("{ms}ms")
    } else {
        format!("{:.1}s", d.as_secs_f64())
    }
}

pub fn format_psnr(psnr: f64) -> String {
    if psnr.is_infinite() {
        "inf dB".to_string()
    } else {
        format!("{psnr:.2} dB")
    }
}

fn time_suffix(elapsed: Duration) -> String {
    format!("  \x1b[2m{}\x1b[0m", format_duration(elapsed))
}

/// One line per diff run: verdict, counts and error statistics.
pub fn print_diff_line(report: &StatsReport, elapsed: Duration) {
    let name = format!("{} vs {}", report.left, report.right);
    let detail = format!(
        "{}x{}, {} pixels ({:.2}%), mse {:.3}, psnr {}, {} engine",
        report.width,
        report.height,
        report.diff_count,
        report.diff_percent,
        report.mse,
        format_psnr(report.psnr),
        report.engine,
    );
    if report.diff_count == 0 {
        println!("  \x1b[32mSAME\x1b[0m  {name}  ({detail}){}", time_suffix(elapsed));
    } else {
        println!("  \x1b[31mDIFF\x1b[0m  {name}  ({detail}){}", time_suffix(elapsed));
    }
}

pub fn print_parity_line(outcome: &ParityOutcome, elapsed: Duration) {
    if outcome.passed {
        println!("  \x1b[32mPASS\x1b[0m  parity check{}", time_suffix(elapsed));
    } else {
        println!("  \x1b[31mFAIL\x1b[0m  parity check{}", time_suffix(elapsed));
    }
    for line in outcome.logs.lines() {
        println!("        \x1b[2m{line}\x1b[0m");
    }
}

pub fn print_frame_line(source: &str, frame: &MediaFrame, out: &Path, elapsed: Duration) {
    let (w, h) = frame.dimensions();
    let via = match (frame.timestamp(), frame.method()) {
        (Some(t), Some(method)) => format!(" at {t:.3}s via {method}"),
        _ => String::new(),
    };
    println!(
        "  \x1b[32m  OK\x1b[0m  {source}  ({w}x{h}{via}) -> {}{}",
        out.display(),
        time_suffix(elapsed)
    );
}

pub fn print_render_line(mode: ViewMode, backend: BackendKind, out: &Path, elapsed: Duration) {
    println!(
        "  \x1b[32m  OK\x1b[0m  {mode} ({backend}) -> {}{}",
        out.display(),
        time_suffix(elapsed)
    );
}
