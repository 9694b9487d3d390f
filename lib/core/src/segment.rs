use serde::{Deserialize, Serialize};

use crate::embedding::Embedding;

/// Segment number of the canonical main image for a laminate.
pub const MAIN_SEGMENT: i32 = 0;

/// Highest allowed texture segment number (main image plus up to 12 segments).
pub const MAX_SEGMENT_NUM: i32 = 12;

/// One stored catalog record: a laminate's main image or a texture segment.
///
/// Records are keyed by `(laminate_id, segment_num)` and never updated in
/// place. The store enforces that at most one record per laminate carries
/// `segment_num == 0`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaminateSegment {
    /// Groups all images belonging to one physical laminate product.
    pub laminate_id: i64,
    /// `0` for the main representative image, `1..=12` for texture segments.
    pub segment_num: i32,
    /// Opaque reference to the stored image bytes.
    pub image_url: String,
    /// Unit-norm embedding of the normalized image.
    pub embedding: Embedding,
    pub name: String,
    pub color: Option<String>,
    pub code: Option<String>,
    /// Open key-value mapping, opaque to the matching pipeline.
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl LaminateSegment {
    #[inline]
    pub fn is_main(&self) -> bool {
        self.segment_num == MAIN_SEGMENT
    }

    /// Summary view without the embedding, as returned from store queries.
    #[must_use]
    pub fn summary(&self) -> SegmentSummary {
        SegmentSummary {
            laminate_id: self.laminate_id,
            segment_num: self.segment_num,
            image_url: self.image_url.clone(),
            name: self.name.clone(),
            color: self.color.clone(),
            code: self.code.clone(),
        }
    }
}

/// A catalog record without its embedding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentSummary {
    pub laminate_id: i64,
    pub segment_num: i32,
    pub image_url: String,
    pub name: String,
    pub color: Option<String>,
    pub code: Option<String>,
}

/// One ranked search result, always resolved to the laminate's main image.
///
/// `similarity` comes from the best-matching segment for the laminate, which
/// may not be the main image itself.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchResult {
    pub laminate_id: i64,
    pub name: String,
    pub color: Option<String>,
    pub code: Option<String>,
    pub image_url: String,
    /// Always `0`: results surface the representative image.
    pub segment_num: i32,
    /// Rounded to 3 decimal digits for presentation stability.
    pub similarity: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(laminate_id: i64, segment_num: i32) -> LaminateSegment {
        LaminateSegment {
            laminate_id,
            segment_num,
            image_url: format!("/uploads/{laminate_id}-{segment_num}.jpg"),
            embedding: Embedding::new(vec![1.0, 0.0]),
            name: "Volango Concreat".to_string(),
            color: Some("grey".to_string()),
            code: None,
            metadata: serde_json::json!({}),
        }
    }

    #[test]
    fn test_main_flag() {
        assert!(segment(5223, 0).is_main());
        assert!(!segment(5223, 3).is_main());
    }

    #[test]
    fn test_summary_drops_embedding() {
        let seg = segment(5223, 2);
        let summary = seg.summary();
        assert_eq!(summary.laminate_id, 5223);
        assert_eq!(summary.segment_num, 2);
        assert_eq!(summary.image_url, seg.image_url);
        assert_eq!(summary.name, seg.name);
    }
}
