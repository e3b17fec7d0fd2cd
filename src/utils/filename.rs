//! 类目文件名工具
//!
//! 匈牙利语类目名 → 安全的英文文件名（音标转写 + 清洗）。

/// 把匈牙利语重音字符转写为英文等价字符
pub fn transliterate(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            'á' => 'a',
            'é' => 'e',
            'í' => 'i',
            'ó' | 'ö' | 'ő' => 'o',
            'ú' | 'ü' | 'ű' => 'u',
            'Á' => 'A',
            'É' => 'E',
            'Í' => 'I',
            'Ó' | 'Ö' | 'Ő' => 'O',
            'Ú' | 'Ü' | 'Ű' => 'U',
            other => other,
        })
        .collect()
}

/// 把类目名变成安全的小写文件名（不含扩展名）
///
/// 转写后仅保留字母数字、空格、连字符，空白折叠为下划线。
pub fn sanitize_category_filename(name: &str) -> String {
    let transliterated = transliterate(name);
    let cleaned: String = transliterated
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || c.is_whitespace() || *c == '-')
        .collect();

    cleaned
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .to_lowercase()
}
