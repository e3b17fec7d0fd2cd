//! 日志工具模块
//!
//! tracing 初始化与各运行阶段的横幅输出辅助函数。

use tracing::info;
use tracing_subscriber::EnvFilter;

/// 初始化全局日志（幂等，测试里可重复调用）
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// 记录运行启动横幅
pub fn log_run_header(title: &str) {
    info!("{}", "=".repeat(50));
    info!("🚀 {}", title);
    info!("{}", "=".repeat(50));
}

/// 记录运行结束横幅
pub fn log_run_footer() {
    info!("\n{}", "=".repeat(50));
    info!(
        "完成时间: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
}

/// 截断长文本用于日志显示
pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() > max_len {
        text.chars().take(max_len).collect::<String>() + "..."
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_text_respects_char_boundaries() {
        assert_eq!(truncate_text("rövid", 10), "rövid");
        assert_eq!(truncate_text("Elsősegélynyújtás", 4), "Első...");
    }
}
