//! Subgraph export: JSON, GraphML and CSV renderings of a [`GraphView`].

use std::fmt;
use std::io::Cursor;
use std::str::FromStr;

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use serde::{Deserialize, Serialize};

use super::GraphView;
use crate::{KgraphError, Result};

const GRAPHML_NS: &str = "http://graphml.graphdrawing.org/xmlns";

const CSV_HEADER: &str = "kind,id,label,source,target,confidence,source_doc,span,timestamp";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Json,
    Graphml,
    Csv,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Graphml => "graphml",
            ExportFormat::Csv => "csv",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ExportFormat::Json => "application/json",
            ExportFormat::Graphml => "application/xml",
            ExportFormat::Csv => "text/csv; charset=utf-8",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for ExportFormat {
    type Err = KgraphError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "graphml" | "xml" => Ok(ExportFormat::Graphml),
            "csv" => Ok(ExportFormat::Csv),
            other => Err(KgraphError::InvalidInput(format!("unknown export format: {}", other))),
        }
    }
}

/// Serialize a view in the requested format.
pub fn export_view(view: &GraphView, format: ExportFormat) -> Result<Vec<u8>> {
    match format {
        ExportFormat::Json => {
            serde_json::to_vec_pretty(view).map_err(|e| KgraphError::Export(e.to_string()))
        }
        ExportFormat::Graphml => write_graphml(view),
        ExportFormat::Csv => Ok(write_csv(view).into_bytes()),
    }
}

/// (key id, target element, attribute name, GraphML type)
const GRAPHML_KEYS: &[(&str, &str, &str, &str)] = &[
    ("n_label", "node", "label", "string"),
    ("n_created_at", "node", "created_at", "string"),
    ("e_label", "edge", "label", "string"),
    ("e_confidence", "edge", "confidence", "double"),
    ("e_source_doc", "edge", "source_doc", "string"),
    ("e_span", "edge", "span", "string"),
    ("e_updated_at", "edge", "updated_at", "string"),
];

fn write_graphml(view: &GraphView) -> Result<Vec<u8>> {
    let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);

    emit(&mut writer, Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
    emit(
        &mut writer,
        Event::Start(BytesStart::new("graphml").with_attributes([("xmlns", GRAPHML_NS)])),
    )?;

    for (id, target, name, kind) in GRAPHML_KEYS {
        emit(
            &mut writer,
            Event::Empty(BytesStart::new("key").with_attributes([
                ("id", *id),
                ("for", *target),
                ("attr.name", *name),
                ("attr.type", *kind),
            ])),
        )?;
    }

    emit(
        &mut writer,
        Event::Start(BytesStart::new("graph").with_attributes([("id", "G"), ("edgedefault", "directed")])),
    )?;

    for node in &view.nodes {
        emit(&mut writer, Event::Start(BytesStart::new("node").with_attributes([("id", node.id.as_str())])))?;
        data(&mut writer, "n_label", &node.label)?;
        if let Some(created_at) = &node.created_at {
            data(&mut writer, "n_created_at", created_at)?;
        }
        emit(&mut writer, Event::End(BytesEnd::new("node")))?;
    }

    for edge in &view.edges {
        emit(
            &mut writer,
            Event::Start(BytesStart::new("edge").with_attributes([
                ("id", edge.id.as_str()),
                ("source", edge.source.as_str()),
                ("target", edge.target.as_str()),
            ])),
        )?;
        data(&mut writer, "e_label", &edge.label)?;
        data(&mut writer, "e_confidence", &edge.confidence.to_string())?;
        if let Some(source_doc) = &edge.source_doc {
            data(&mut writer, "e_source_doc", source_doc)?;
        }
        if let Some(span) = &edge.span {
            data(&mut writer, "e_span", span)?;
        }
        if let Some(updated_at) = &edge.updated_at {
            data(&mut writer, "e_updated_at", updated_at)?;
        }
        emit(&mut writer, Event::End(BytesEnd::new("edge")))?;
    }

    emit(&mut writer, Event::End(BytesEnd::new("graph")))?;
    emit(&mut writer, Event::End(BytesEnd::new("graphml")))?;

    let mut bytes = writer.into_inner().into_inner();
    bytes.push(b'\n');
    Ok(bytes)
}

fn emit(writer: &mut Writer<Cursor<Vec<u8>>>, event: Event<'_>) -> Result<()> {
    writer
        .write_event(event)
        .map_err(|e| KgraphError::Export(format!("GraphML write failed: {}", e)))
}

fn data(writer: &mut Writer<Cursor<Vec<u8>>>, key: &str, value: &str) -> Result<()> {
    emit(writer, Event::Start(BytesStart::new("data").with_attributes([("key", key)])))?;
    emit(writer, Event::Text(BytesText::new(value)))?;
    emit(writer, Event::End(BytesEnd::new("data")))
}

fn write_csv(view: &GraphView) -> String {
    let mut out = String::new();
    out.push_str(CSV_HEADER);
    out.push_str("\r\n");

    for node in &view.nodes {
        let row = [
            "node",
            node.id.as_str(),
            node.label.as_str(),
            "",
            "",
            "",
            "",
            "",
            node.created_at.as_deref().unwrap_or_default(),
        ];
        push_csv_row(&mut out, &row);
    }

    for edge in &view.edges {
        let confidence = edge.confidence.to_string();
        let row = [
            "edge",
            edge.id.as_str(),
            edge.label.as_str(),
            edge.source.as_str(),
            edge.target.as_str(),
            confidence.as_str(),
            edge.source_doc.as_deref().unwrap_or_default(),
            edge.span.as_deref().unwrap_or_default(),
            edge.updated_at.as_deref().unwrap_or_default(),
        ];
        push_csv_row(&mut out, &row);
    }

    out
}

fn push_csv_row(out: &mut String, fields: &[&str]) {
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&csv_field(field));
    }
    out.push_str("\r\n");
}

/// RFC 4180 quoting: wrap in quotes when needed, double embedded quotes.
fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\r', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
