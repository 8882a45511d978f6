//! Source-label → canonical-field dictionary.
//!
//! The properties panel is a flat table of natural-language labels. Each
//! recognized label maps to one [`CanonicalField`], which carries its own
//! value transform. Unrecognized labels are dropped silently.

use chrono::NaiveDate;
use tracing::warn;

use crate::types::DocumentProperties;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CanonicalField {
    Id,
    LegislationType,
    Categories,
    Organization,
    Signers,
    GazetteNumber,
    IssuedDate,
    GazetteDate,
    EffectiveDate,
    Status,
}

/// How a raw cell value becomes a field value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transform {
    Verbatim,
    /// Comma-separated, each item trimmed
    List,
    /// `dd/mm/yyyy` → `yyyy-mm-dd`
    Date,
}

const LABELS: [(&str, CanonicalField); 10] = [
    ("Số hiệu", CanonicalField::Id),
    ("Loại văn bản", CanonicalField::LegislationType),
    ("Lĩnh vực, ngành", CanonicalField::Categories),
    ("Nơi ban hành", CanonicalField::Organization),
    ("Người ký", CanonicalField::Signers),
    ("Số công báo", CanonicalField::GazetteNumber),
    ("Ngày ban hành", CanonicalField::IssuedDate),
    ("Ngày đăng", CanonicalField::GazetteDate),
    ("Ngày hiệu lực", CanonicalField::EffectiveDate),
    ("Tình trạng", CanonicalField::Status),
];

impl CanonicalField {
    /// Look up a source label. A trailing `:` and surrounding whitespace are ignored.
    pub fn from_label(label: &str) -> Option<Self> {
        let label = label.trim().trim_end_matches(':').trim_end();
        LABELS
            .iter()
            .find(|(source, _)| *source == label)
            .map(|(_, field)| *field)
    }

    pub fn transform(&self) -> Transform {
        match self {
            CanonicalField::Categories | CanonicalField::Signers => Transform::List,
            CanonicalField::IssuedDate
            | CanonicalField::GazetteDate
            | CanonicalField::EffectiveDate => Transform::Date,
            _ => Transform::Verbatim,
        }
    }

    /// Store `raw` into `props`, transformed for this field.
    pub fn apply(&self, props: &mut DocumentProperties, raw: &str) {
        let raw = raw.trim();
        match self.transform() {
            Transform::List => {
                let items = split_list(raw);
                match self {
                    CanonicalField::Categories => props.categories = items,
                    _ => props.signers = items,
                }
            }
            Transform::Date => {
                let date = to_iso_date(raw);
                if date.is_none() && !raw.is_empty() {
                    warn!(field = ?self, value = %raw, "Unrecognized date format, leaving field empty");
                }
                match self {
                    CanonicalField::IssuedDate => props.issued_date = date,
                    CanonicalField::GazetteDate => props.gazette_date = date,
                    _ => props.effective_date = date,
                }
            }
            Transform::Verbatim => {
                let value = Some(raw.to_string());
                match self {
                    CanonicalField::Id => props.id = value,
                    CanonicalField::LegislationType => props.legislation_type = value,
                    CanonicalField::Organization => props.organization = value,
                    CanonicalField::GazetteNumber => props.gazette_number = value,
                    _ => props.status = value,
                }
            }
        }
    }
}

/// Fold label/value pairs into canonical properties.
pub fn normalize_properties<'a, I>(pairs: I) -> DocumentProperties
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut props = DocumentProperties::default();
    for (label, value) in pairs {
        if let Some(field) = CanonicalField::from_label(label) {
            field.apply(&mut props, value);
        }
    }
    props
}

/// Split a comma-separated cell, dropping empty items.
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(String::from)
        .collect()
}

/// Rewrite a `dd/mm/yyyy` date as `yyyy-mm-dd`.
///
/// Input already in ISO form is kept. Anything else (missing component,
/// short year, impossible calendar date, free text) yields `None`.
pub fn to_iso_date(raw: &str) -> Option<String> {
    let raw = raw.trim();
    let (format, year) = if raw.contains('/') {
        ("%d/%m/%Y", raw.rsplit('/').next())
    } else {
        ("%Y-%m-%d", raw.split('-').next())
    };
    // chrono's %Y takes any digit count, so "17/06/20" would become year 20
    if !year.is_some_and(|y| y.len() == 4 && y.bytes().all(|b| b.is_ascii_digit())) {
        return None;
    }
    NaiveDate::parse_from_str(raw, format)
        .ok()
        .map(|date| date.format("%Y-%m-%d").to_string())
}
