//! Exposition rendering.
//!
//! Stateless over the store and the internal metrics registry: collect
//! each shard's live points into one metric family, encode with the
//! encoder negotiated from the Accept header, and gzip when the scraper
//! advertises support. A family that fails to encode is logged and
//! skipped; a scraper that hung up ends the render silently.

use crate::core::Result;
use crate::store::MetricStore;
use flate2::write::GzEncoder;
use flate2::Compression;
use prometheus::proto;
use prometheus::{Encoder, ProtobufEncoder, TextEncoder};
use std::io::Write;

/// Encoder selected from a scrape request's Accept header.
///
/// The `prometheus` encoder trait is not object-safe, so negotiation
/// yields an enum rather than a trait object.
pub enum NegotiatedEncoder {
    /// Plain text exposition format.
    Text(TextEncoder),
    /// Delimited protobuf exposition format.
    Protobuf(ProtobufEncoder),
}

impl NegotiatedEncoder {
    /// Pick an encoder from the Accept header. Anything other than an
    /// explicit protobuf media type gets text.
    pub fn negotiate(accept: Option<&str>) -> Self {
        match accept {
            Some(header) if accepts_protobuf(header) => Self::Protobuf(ProtobufEncoder::new()),
            _ => Self::Text(TextEncoder::new()),
        }
    }

    /// The Content-Type for responses produced by this encoder.
    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Text(_) => prometheus::TEXT_FORMAT,
            Self::Protobuf(_) => prometheus::PROTOBUF_FORMAT,
        }
    }

    fn encode<W: Write>(
        &self,
        families: &[proto::MetricFamily],
        writer: &mut W,
    ) -> prometheus::Result<()> {
        match self {
            Self::Text(encoder) => encoder.encode(families, writer),
            Self::Protobuf(encoder) => encoder.encode(families, writer),
        }
    }
}

fn accepts_protobuf(accept: &str) -> bool {
    accept.split(',').any(|part| {
        let part = part.trim();
        part.starts_with("application/vnd.google.protobuf")
            && part.contains("proto=io.prometheus.client.MetricFamily")
    })
}

/// Whether an Accept-Encoding header admits gzip.
pub fn accepts_gzip(accept_encoding: Option<&str>) -> bool {
    accept_encoding.is_some_and(|header| {
        header.split(',').any(|part| {
            let part = part.trim();
            part == "gzip" || part.starts_with("gzip;")
        })
    })
}

fn client_gone(error: &prometheus::Error) -> bool {
    matches!(
        error,
        prometheus::Error::Io(io) if matches!(
            io.kind(),
            std::io::ErrorKind::BrokenPipe | std::io::ErrorKind::ConnectionReset
        )
    )
}

impl MetricStore {
    /// Render every live point plus the internal metrics into `writer`,
    /// gzipped when requested.
    pub fn render<W: Write>(
        &self,
        writer: &mut W,
        encoder: &NegotiatedEncoder,
        gzip: bool,
    ) -> Result<()> {
        if gzip {
            let mut compressed = GzEncoder::new(writer, Compression::default());
            self.render_families(&mut compressed, encoder)?;
            if let Err(error) = compressed.finish() {
                if !matches!(
                    error.kind(),
                    std::io::ErrorKind::BrokenPipe | std::io::ErrorKind::ConnectionReset
                ) {
                    return Err(error.into());
                }
            }
            Ok(())
        } else {
            self.render_families(writer, encoder)
        }
    }

    /// Render as plain text, for tests and diagnostics.
    pub fn render_text(&self) -> Result<String> {
        let mut buffer = Vec::new();
        self.render(&mut buffer, &NegotiatedEncoder::negotiate(None), false)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }

    fn render_families<W: Write>(&self, writer: &mut W, encoder: &NegotiatedEncoder) -> Result<()> {
        let families = self
            .collect_families()
            .into_iter()
            .chain(self.internal_metrics().gather());
        for family in families {
            if let Err(error) = encoder.encode(std::slice::from_ref(&family), writer) {
                if client_gone(&error) {
                    tracing::debug!(family = family.get_name(), "scraper disconnected mid-render");
                    return Ok(());
                }
                self.internal_metrics().render_errors.inc();
                tracing::warn!(family = family.get_name(), %error, "failed to encode metric family");
            }
        }
        Ok(())
    }

    /// Collect each shard's live points into one family sharing name,
    /// help, and type. Shards whose points are all swept collapse to
    /// nothing.
    pub(crate) fn collect_families(&self) -> Vec<proto::MetricFamily> {
        let mut names: Vec<String> = self.shards.iter().map(|entry| entry.key().clone()).collect();
        names.sort_unstable();

        names
            .iter()
            .filter_map(|name| {
                let shard = self.shards.get(name)?;
                let mut family = proto::MetricFamily::default();
                let mut family_type = None;
                let mut help = None;
                for entry in shard.iter() {
                    let point = entry.value();
                    if point.is_swept() {
                        continue;
                    }
                    if family_type.is_none() {
                        family_type = Some(point.family_type());
                        help = point.help().map(str::to_string);
                    }
                    let mut metric = proto::Metric::default();
                    point.fill_metric(&mut metric);
                    family.mut_metric().push(metric);
                }
                let family_type = family_type?;
                family.set_name(name.clone());
                family.set_help(help.unwrap_or_default());
                family.set_field_type(family_type);
                Some(family)
            })
            .collect()
    }
}
