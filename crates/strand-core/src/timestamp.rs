//! 纳秒时间戳工具.
//!
//! 整个管线内部统一使用 i64 纳秒表示时间戳与时长.

/// 每秒纳秒数
pub const NS_PER_SEC: i64 = 1_000_000_000;

/// 每毫秒纳秒数
pub const NS_PER_MS: i64 = 1_000_000;

/// 将纳秒时间戳格式化为 `HH:MM:SS.nnnnnnnnn`, 负值带 `-` 前缀
pub fn format_timestamp(ns: i64) -> String {
    let sign = if ns < 0 { "-" } else { "" };
    let abs = ns.unsigned_abs();
    let ns_per_sec = NS_PER_SEC as u64;
    let secs = abs / ns_per_sec;
    format!(
        "{}{:02}:{:02}:{:02}.{:09}",
        sign,
        secs / 3600,
        (secs / 60) % 60,
        secs % 60,
        abs % ns_per_sec
    )
}

/// 将帧率 (num/den) 换算为每帧纳秒数, 四舍五入
pub fn frame_duration_ns(fps_num: i64, fps_den: i64) -> Option<i64> {
    if fps_num <= 0 || fps_den <= 0 {
        return None;
    }
    let num = i128::from(NS_PER_SEC) * i128::from(fps_den);
    let den = i128::from(fps_num);
    Some(((num + den / 2) / den) as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_timestamp() {
        assert_eq!(format_timestamp(0), "00:00:00.000000000");
        assert_eq!(format_timestamp(3_723_040_000_000), "01:02:03.040000000");
        assert_eq!(format_timestamp(-40_000_000), "-00:00:00.040000000");
    }

    #[test]
    fn test_frame_duration() {
        assert_eq!(frame_duration_ns(25, 1), Some(40_000_000));
        assert_eq!(frame_duration_ns(30000, 1001), Some(33_366_667));
        assert_eq!(frame_duration_ns(0, 1), None);
    }
}
