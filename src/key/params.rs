use std::fmt;
use std::str::FromStr;

use super::MalformedRequest;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputFormat {
    Auto,
    Jpeg,
    Png,
    Webp,
    Avif,
    Gif,
}

impl OutputFormat {
    pub const fn as_str(self) -> &'static str {
        match self {
            OutputFormat::Auto => "auto",
            OutputFormat::Jpeg => "jpeg",
            OutputFormat::Png => "png",
            OutputFormat::Webp => "webp",
            OutputFormat::Avif => "avif",
            OutputFormat::Gif => "gif",
        }
    }

    /// `None` for `Auto`, which has to be negotiated before anything is produced.
    pub const fn content_type(self) -> Option<&'static str> {
        match self {
            OutputFormat::Auto => None,
            OutputFormat::Jpeg => Some("image/jpeg"),
            OutputFormat::Png => Some("image/png"),
            OutputFormat::Webp => Some("image/webp"),
            OutputFormat::Avif => Some("image/avif"),
            OutputFormat::Gif => Some("image/gif"),
        }
    }

    /// Picks the best output format the client accepts: avif, then webp, then jpeg.
    pub fn negotiate(accept: Option<&str>) -> Self {
        let accept = accept.unwrap_or_default().to_ascii_lowercase();
        let accepts = |mime: &str| {
            accept
                .split(',')
                .map(|part| part.split(';').next().unwrap_or_default().trim())
                .any(|part| part == mime)
        };
        if accepts("image/avif") {
            OutputFormat::Avif
        } else if accepts("image/webp") {
            OutputFormat::Webp
        } else {
            OutputFormat::Jpeg
        }
    }
}

impl FromStr for OutputFormat {
    type Err = MalformedRequest;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "auto" => Ok(OutputFormat::Auto),
            "jpeg" | "jpg" => Ok(OutputFormat::Jpeg),
            "png" => Ok(OutputFormat::Png),
            "webp" => Ok(OutputFormat::Webp),
            "avif" => Ok(OutputFormat::Avif),
            "gif" => Ok(OutputFormat::Gif),
            other => Err(MalformedRequest::new(format!(
                "unsupported output format '{other}'"
            ))),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct TransformParams {
    pub format: Option<OutputFormat>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub quality: Option<u8>,
}

impl TransformParams {
    pub fn is_empty(&self) -> bool {
        self.format.is_none() && self.width.is_none() && self.height.is_none() && self.quality.is_none()
    }

    /// Renders `format=..,width=..,height=..,quality=..`, skipping absent values.
    pub fn render(&self) -> String {
        let mut parts = Vec::with_capacity(4);
        if let Some(format) = self.format {
            parts.push(format!("format={format}"));
        }
        if let Some(width) = self.width {
            parts.push(format!("width={width}"));
        }
        if let Some(height) = self.height {
            parts.push(format!("height={height}"));
        }
        if let Some(quality) = self.quality {
            parts.push(format!("quality={quality}"));
        }
        parts.join(",")
    }

    pub(super) fn parse_rendered(rendered: &str) -> Result<Self, MalformedRequest> {
        let mut params = TransformParams::default();
        for part in rendered.split(',') {
            let (name, value) = part
                .split_once('=')
                .ok_or_else(|| MalformedRequest::new(format!("invalid parameter '{part}'")))?;
            params.set(name, value, u32::MAX)?;
        }
        if params.is_empty() {
            return Err(MalformedRequest::new("no transform parameters"));
        }
        Ok(params)
    }

    /// Applies one named parameter. Setting a parameter twice is malformed.
    pub(super) fn set(
        &mut self,
        name: &str,
        value: &str,
        max_dimension: u32,
    ) -> Result<(), MalformedRequest> {
        match name {
            "format" => {
                let format = value.parse()?;
                replace_once(&mut self.format, format, name)
            }
            "width" => {
                let width = parse_dimension(value, max_dimension)?;
                replace_once(&mut self.width, width, name)
            }
            "height" => {
                let height = parse_dimension(value, max_dimension)?;
                replace_once(&mut self.height, height, name)
            }
            "quality" => {
                let quality = parse_quality(value)?;
                replace_once(&mut self.quality, quality, name)
            }
            other => Err(MalformedRequest::new(format!(
                "unknown transform parameter '{other}'"
            ))),
        }
    }

    pub(super) fn is_param_name(name: &str) -> bool {
        matches!(name, "format" | "width" | "height" | "quality")
    }
}

fn replace_once<T>(slot: &mut Option<T>, value: T, name: &str) -> Result<(), MalformedRequest> {
    if slot.is_some() {
        return Err(MalformedRequest::new(format!(
            "transform parameter '{name}' given more than once"
        )));
    }
    *slot = Some(value);
    Ok(())
}

pub(super) fn parse_dimension(value: &str, max: u32) -> Result<u32, MalformedRequest> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) || value.starts_with('0') {
        return Err(MalformedRequest::new(format!("invalid dimension '{value}'")));
    }
    let parsed: u32 = value
        .parse()
        .map_err(|_| MalformedRequest::new(format!("invalid dimension '{value}'")))?;
    if parsed > max {
        return Err(MalformedRequest::new(format!(
            "dimension {parsed} exceeds limit of {max}"
        )));
    }
    Ok(parsed)
}

pub(super) fn parse_quality(value: &str) -> Result<u8, MalformedRequest> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) || value.starts_with('0') {
        return Err(MalformedRequest::new(format!("invalid quality '{value}'")));
    }
    match value.parse::<u8>() {
        Ok(quality) if (1..=100).contains(&quality) => Ok(quality),
        _ => Err(MalformedRequest::new(format!(
            "quality must be between 1 and 100 (got '{value}')"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negotiate_prefers_avif_then_webp() {
        assert_eq!(
            OutputFormat::negotiate(Some("image/webp,image/avif;q=0.9")),
            OutputFormat::Avif
        );
        assert_eq!(
            OutputFormat::negotiate(Some("text/html, image/webp")),
            OutputFormat::Webp
        );
        assert_eq!(OutputFormat::negotiate(Some("*/*")), OutputFormat::Jpeg);
    }

    #[test]
    fn jpg_alias_maps_to_jpeg() {
        assert_eq!("JPG".parse::<OutputFormat>(), Ok(OutputFormat::Jpeg));
        assert!("tiff".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn dimensions_reject_leading_zeroes_and_overflow() {
        assert!(parse_dimension("0400", 4000).is_err());
        assert!(parse_dimension("0", 4000).is_err());
        assert!(parse_dimension("4001", 4000).is_err());
        assert_eq!(parse_dimension("4000", 4000), Ok(4000));
    }

    #[test]
    fn quality_bounds() {
        assert!(parse_quality("0").is_err());
        assert!(parse_quality("101").is_err());
        assert_eq!(parse_quality("85"), Ok(85));
    }

    #[test]
    fn set_twice_is_malformed() {
        let mut params = TransformParams::default();
        params.set("width", "10", 100).expect("first width");
        assert!(params.set("width", "20", 100).is_err());
    }
}
