//! Reading and annotating cached tile documents.
//!
//! Tile documents are WFS GetFeature responses. Three operations are
//! needed here: pulling the feature-count attributes off the root
//! element, streaming the feature members out of a document for
//! import, and rewriting the root counts on an in-memory copy of the
//! seed document. Everything is event-driven; documents are never
//! materialised as a tree.

use std::{
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
};

use geo::{Coord, Rect};
use quick_xml::Reader;
use quick_xml::Writer;
use quick_xml::events::attributes::AttrError;
use quick_xml::events::{BytesStart, Event};
use tilegrab_core::{AxisConvention, CountTotals, TileCounts};

use crate::proj::Projection;

const COUNT_ATTRIBUTES: [&str; 3] = ["numberMatched", "numberReturned", "numberOfFeatures"];
const COORD_ELEMENTS: [&[u8]; 5] = [
    b"pos",
    b"posList",
    b"coordinates",
    b"lowerCorner",
    b"upperCorner",
];

/// Errors raised while reading or rewriting tile documents.
#[derive(Debug, thiserror::Error)]
pub enum GmlError {
    /// The document could not be opened or read.
    #[error("failed to read tile document {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// The document is not well-formed XML.
    #[error("malformed tile document {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: quick_xml::Error,
    },
    /// An element carried unparsable attributes.
    #[error("malformed attributes in tile document {path:?}: {source}")]
    Attributes {
        path: PathBuf,
        #[source]
        source: AttrError,
    },
    /// The document ended before a root element appeared.
    #[error("tile document {path:?} has no root element")]
    MissingRoot { path: PathBuf },
    /// Re-serialising the annotated document failed.
    #[error("failed to rewrite tile document {path:?}: {source}")]
    Serialize {
        path: PathBuf,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// One feature member extracted from a tile document.
#[derive(Debug, Clone, PartialEq)]
pub struct RawFeature {
    /// Value of the configured unique-key field, when present.
    pub fid: Option<String>,
    /// Envelope of all coordinates found in the member, already in the
    /// canonical CRS. `None` when the member carries no geometry.
    pub envelope: Option<Rect<f64>>,
    /// The member subtree, serialised back to XML.
    pub member: String,
}

/// Read the feature-count attributes from a document's root element.
///
/// Missing or non-numeric attributes become `None`; an unreadable or
/// unparsable document is an error and halts the calling phase.
pub fn read_root_counts(path: &Path) -> Result<TileCounts, GmlError> {
    let file = File::open(path).map_err(|source| GmlError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let mut reader = Reader::from_reader(BufReader::new(file));
    let mut buf = Vec::new();

    loop {
        match read_event(&mut reader, &mut buf, path)? {
            Event::Start(root) | Event::Empty(root) => return counts_from_root(&root, path),
            Event::Eof => {
                return Err(GmlError::MissingRoot {
                    path: path.to_path_buf(),
                });
            }
            _ => {}
        }
        buf.clear();
    }
}

/// Extract the feature members of a tile document.
///
/// Members are elements named `member` or `featureMember` directly
/// under the root, or the children of a `featureMembers` group. The
/// unique-key value is taken from a child element named after
/// `uniqueid_field` (or that attribute on the feature element), with
/// the `gml:id` attribute as fallback. Coordinates found in
/// `pos`/`posList`/`coordinates`/corner elements are interpreted in
/// the run's axis convention and reprojected to the canonical CRS to
/// build the member envelope.
pub fn read_features(
    path: &Path,
    uniqueid_field: Option<&str>,
    convention: AxisConvention,
    projection: Projection,
) -> Result<Vec<RawFeature>, GmlError> {
    let file = File::open(path).map_err(|source| GmlError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let mut reader = Reader::from_reader(BufReader::new(file));
    let mut buf = Vec::new();

    let mut features = Vec::new();
    let mut depth = 0_usize;
    let mut wrapper_depth: Option<usize> = None;
    let mut capture: Option<FeatureCapture> = None;

    loop {
        let event = read_event(&mut reader, &mut buf, path)?;
        match event {
            Event::Start(ref start) => {
                depth += 1;
                if let Some(active) = capture.as_mut() {
                    active.on_start(start, path)?;
                } else if depth == 2 && is_member_wrapper(start) {
                    wrapper_depth = Some(depth);
                } else if wrapper_depth == Some(depth - 1) {
                    let mut active = FeatureCapture::new(
                        depth,
                        uniqueid_field.map(str::to_owned),
                        convention,
                        projection,
                    );
                    active.on_start(start, path)?;
                    capture = Some(active);
                }
            }
            Event::Empty(ref start) => {
                if let Some(active) = capture.as_mut() {
                    active.on_empty(start, path)?;
                } else if wrapper_depth == Some(depth) && !is_member_wrapper(start) {
                    // A childless feature member.
                    let mut active = FeatureCapture::new(
                        depth + 1,
                        uniqueid_field.map(str::to_owned),
                        convention,
                        projection,
                    );
                    active.on_empty(start, path)?;
                    features.push(active.finish(path)?);
                }
            }
            Event::Text(ref text) => {
                if let Some(active) = capture.as_mut() {
                    active.on_text(text, path)?;
                }
            }
            Event::End(ref end) => {
                if let Some(active) = capture.as_mut() {
                    let done = active.on_end(end, depth, path)?;
                    if done {
                        let finished = capture.take().map(|c| c.finish(path)).transpose()?;
                        if let Some(feature) = finished {
                            features.push(feature);
                        }
                    }
                }
                if wrapper_depth == Some(depth) {
                    wrapper_depth = None;
                }
                depth = depth.saturating_sub(1);
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(features)
}

/// Rewrite the root count attributes on an in-memory copy of a tile
/// document.
///
/// Only tracked kinds are written; untracked attributes are left
/// exactly as they were. The caller owns the returned bytes — nothing
/// is persisted here.
pub fn annotate_root_counts(
    path: &Path,
    bytes: &[u8],
    totals: &CountTotals,
) -> Result<Vec<u8>, GmlError> {
    let mut reader = Reader::from_reader(bytes);
    let mut writer = Writer::new(Vec::new());
    let mut buf = Vec::new();
    let mut root_seen = false;

    loop {
        let event = read_event(&mut reader, &mut buf, path)?;
        match event {
            Event::Start(ref start) if !root_seen => {
                root_seen = true;
                let updated = root_with_totals(start, totals, path)?;
                write_event(&mut writer, Event::Start(updated), path)?;
            }
            // A genuinely empty seed has a self-closing root; it still
            // carries the run's aggregated counts.
            Event::Empty(ref start) if !root_seen => {
                root_seen = true;
                let updated = root_with_totals(start, totals, path)?;
                write_event(&mut writer, Event::Empty(updated), path)?;
            }
            Event::Eof => break,
            other => write_event(&mut writer, other, path)?,
        }
        buf.clear();
    }

    Ok(writer.into_inner())
}

fn root_with_totals<'a>(
    root: &BytesStart<'_>,
    totals: &CountTotals,
    path: &Path,
) -> Result<BytesStart<'a>, GmlError> {
    let name = String::from_utf8_lossy(root.name().as_ref()).into_owned();
    let mut updated = BytesStart::new(name);
    for attr in root.attributes() {
        let attr = attr.map_err(|source| GmlError::Attributes {
            path: path.to_path_buf(),
            source,
        })?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let replaced = COUNT_ATTRIBUTES.contains(&key.as_str()) && tracked_value(totals, &key).is_some();
        if !replaced {
            let value = String::from_utf8_lossy(&attr.value).into_owned();
            updated.push_attribute((key.as_str(), value.as_str()));
        }
    }
    for key in COUNT_ATTRIBUTES {
        if let Some(total) = tracked_value(totals, key) {
            updated.push_attribute((key, total.to_string().as_str()));
        }
    }
    Ok(updated)
}

fn tracked_value(totals: &CountTotals, key: &str) -> Option<u64> {
    match key {
        "numberMatched" => totals.matched(),
        "numberReturned" => totals.returned(),
        "numberOfFeatures" => totals.of_features(),
        _ => None,
    }
}

fn counts_from_root(root: &BytesStart<'_>, path: &Path) -> Result<TileCounts, GmlError> {
    Ok(TileCounts {
        matched: parse_count(root, "numberMatched", path)?,
        returned: parse_count(root, "numberReturned", path)?,
        of_features: parse_count(root, "numberOfFeatures", path)?,
    })
}

fn parse_count(root: &BytesStart<'_>, name: &str, path: &Path) -> Result<Option<u64>, GmlError> {
    let raw = root
        .try_get_attribute(name)
        .map_err(|source| GmlError::Attributes {
            path: path.to_path_buf(),
            source,
        })?
        .map(|attr| String::from_utf8_lossy(&attr.value).into_owned());
    Ok(TileCounts::parse_attribute(raw.as_deref()))
}

fn is_member_wrapper(start: &BytesStart<'_>) -> bool {
    matches!(
        start.local_name().as_ref(),
        b"member" | b"featureMember" | b"featureMembers"
    )
}

fn read_event<'b, R: std::io::BufRead>(
    reader: &mut Reader<R>,
    buf: &'b mut Vec<u8>,
    path: &Path,
) -> Result<Event<'b>, GmlError> {
    reader
        .read_event_into(buf)
        .map_err(|source| GmlError::Parse {
            path: path.to_path_buf(),
            source,
        })
}

fn write_event(
    writer: &mut Writer<Vec<u8>>,
    event: Event<'_>,
    path: &Path,
) -> Result<(), GmlError> {
    writer
        .write_event(event)
        .map_err(|source| GmlError::Serialize {
            path: path.to_path_buf(),
            source: Box::new(source),
        })
}

/// Accumulates one feature member while its subtree streams past.
struct FeatureCapture {
    start_depth: usize,
    uniqueid_field: Option<String>,
    convention: AxisConvention,
    projection: Projection,
    writer: Writer<Vec<u8>>,
    fid: Option<String>,
    fallback_fid: Option<String>,
    envelope: Option<Rect<f64>>,
    collecting_coords: bool,
    collecting_fid: bool,
    first_element: bool,
}

impl FeatureCapture {
    fn new(
        start_depth: usize,
        uniqueid_field: Option<String>,
        convention: AxisConvention,
        projection: Projection,
    ) -> Self {
        Self {
            start_depth,
            uniqueid_field,
            convention,
            projection,
            writer: Writer::new(Vec::new()),
            fid: None,
            fallback_fid: None,
            envelope: None,
            collecting_coords: false,
            collecting_fid: false,
            first_element: true,
        }
    }

    fn on_start(&mut self, start: &BytesStart<'_>, path: &Path) -> Result<(), GmlError> {
        self.inspect_element(start, path)?;
        self.first_element = false;
        write_event(&mut self.writer, Event::Start(start.to_owned()), path)
    }

    fn on_empty(&mut self, start: &BytesStart<'_>, path: &Path) -> Result<(), GmlError> {
        self.inspect_element(start, path)?;
        self.first_element = false;
        write_event(&mut self.writer, Event::Empty(start.to_owned()), path)
    }

    fn on_text(
        &mut self,
        text: &quick_xml::events::BytesText<'_>,
        path: &Path,
    ) -> Result<(), GmlError> {
        let raw = String::from_utf8_lossy(text).into_owned();
        if self.collecting_coords {
            self.extend_envelope(&raw);
        }
        if self.collecting_fid && self.fid.is_none() {
            let trimmed = raw.trim();
            if !trimmed.is_empty() {
                self.fid = Some(trimmed.to_owned());
            }
        }
        write_event(&mut self.writer, Event::Text(text.to_owned()), path)
    }

    /// Returns true when the feature element's own end tag was just
    /// consumed.
    fn on_end(
        &mut self,
        end: &quick_xml::events::BytesEnd<'_>,
        document_depth: usize,
        path: &Path,
    ) -> Result<bool, GmlError> {
        self.collecting_coords = false;
        self.collecting_fid = false;
        write_event(&mut self.writer, Event::End(end.to_owned()), path)?;
        Ok(document_depth == self.start_depth)
    }

    fn inspect_element(&mut self, start: &BytesStart<'_>, path: &Path) -> Result<(), GmlError> {
        let local = start.local_name().as_ref().to_vec();
        if self.first_element {
            self.fallback_fid = attribute_value(start, b"gml:id", path)?;
            if let Some(field) = self.uniqueid_field.clone() {
                if let Some(value) = attribute_value(start, field.as_bytes(), path)? {
                    self.fid = Some(value);
                }
            }
        }
        if COORD_ELEMENTS.contains(&local.as_slice()) {
            self.collecting_coords = true;
        }
        if let Some(field) = self.uniqueid_field.as_deref() {
            if local == field.as_bytes() {
                self.collecting_fid = true;
            }
        }
        Ok(())
    }

    fn extend_envelope(&mut self, raw: &str) {
        let values: Vec<f64> = raw
            .split(|c: char| c.is_whitespace() || c == ',')
            .filter(|part| !part.is_empty())
            .filter_map(|part| part.parse().ok())
            .collect();
        for pair in values.chunks_exact(2) {
            let (x, y) = match self.convention {
                AxisConvention::NativeOrder => (pair[0], pair[1]),
                AxisConvention::GeographicSwap => (pair[1], pair[0]),
            };
            let coord = self.projection.to_canonical(Coord { x, y });
            self.envelope = Some(match self.envelope {
                None => Rect::new(coord, coord),
                Some(rect) => Rect::new(
                    Coord {
                        x: rect.min().x.min(coord.x),
                        y: rect.min().y.min(coord.y),
                    },
                    Coord {
                        x: rect.max().x.max(coord.x),
                        y: rect.max().y.max(coord.y),
                    },
                ),
            });
        }
    }

    fn finish(self, _path: &Path) -> Result<RawFeature, GmlError> {
        let member = String::from_utf8_lossy(&self.writer.into_inner()).into_owned();
        Ok(RawFeature {
            fid: self.fid.or(self.fallback_fid),
            envelope: self.envelope,
            member,
        })
    }
}

fn attribute_value(
    start: &BytesStart<'_>,
    name: &[u8],
    path: &Path,
) -> Result<Option<String>, GmlError> {
    Ok(start
        .try_get_attribute(name)
        .map_err(|source| GmlError::Attributes {
            path: path.to_path_buf(),
            source,
        })?
        .map(|attr| String::from_utf8_lossy(&attr.value).into_owned()))
}
