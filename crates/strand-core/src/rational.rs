//! 有理数类型, 用于像素宽高比 (PAR) 与帧率.

use std::cmp::Ordering;
use std::fmt;

/// 有理数, 由分子和分母组成
///
/// 例如: H.264 VUI 中的 SAR 40:33, 帧率 30000/1001.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rational {
    /// 分子
    pub num: i64,
    /// 分母
    pub den: i64,
}

impl Rational {
    /// 创建新的有理数
    pub const fn new(num: i64, den: i64) -> Self {
        Self { num, den }
    }

    /// 1:1
    pub const ONE: Self = Self { num: 1, den: 1 };

    /// 判断是否有效 (分子分母均为正)
    pub const fn is_valid(&self) -> bool {
        self.num > 0 && self.den > 0
    }

    /// 转换为 f64 浮点数, 分母为 0 时返回 `f64::NAN`
    pub fn to_f64(self) -> f64 {
        if self.den == 0 {
            return f64::NAN;
        }
        self.num as f64 / self.den as f64
    }

    /// 约分并保证分母为正
    pub fn reduce(self) -> Self {
        if self.den == 0 {
            return self;
        }
        let g = gcd(self.num.unsigned_abs(), self.den.unsigned_abs());
        if g == 0 {
            return self;
        }
        let g = g as i64;
        let sign = if self.den < 0 { -1 } else { 1 };
        Self {
            num: sign * self.num / g,
            den: sign * self.den / g,
        }
    }

    /// `value * self`, 四舍五入到整数
    pub fn scale_rounded(self, value: i64) -> i64 {
        div_rounded(i128::from(value) * i128::from(self.num), i128::from(self.den))
    }

    /// `value / self`, 四舍五入到整数
    pub fn unscale_rounded(self, value: i64) -> i64 {
        div_rounded(i128::from(value) * i128::from(self.den), i128::from(self.num))
    }
}

impl PartialOrd for Rational {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Rational {
    /// 交叉相乘比较, 要求分母为正 (先 `reduce`)
    fn cmp(&self, other: &Self) -> Ordering {
        let a = self.reduce();
        let b = other.reduce();
        (i128::from(a.num) * i128::from(b.den)).cmp(&(i128::from(b.num) * i128::from(a.den)))
    }
}

impl fmt::Display for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

impl From<(i64, i64)> for Rational {
    fn from((num, den): (i64, i64)) -> Self {
        Self { num, den }
    }
}

fn div_rounded(num: i128, den: i128) -> i64 {
    if den == 0 {
        return 0;
    }
    let (num, den) = if den < 0 { (-num, -den) } else { (num, den) };
    let half = den / 2;
    let q = if num >= 0 {
        (num + half) / den
    } else {
        (num - half) / den
    };
    q as i64
}

/// 求最大公约数 (欧几里得算法)
fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        let t = b;
        b = a % b;
        a = t;
    }
    a
}
