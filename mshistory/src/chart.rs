//! Time series chart data for the QC web page, delivered as JSONP
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::record::{FieldValue, ParamPath, Parameter, Record};
use crate::parsers::PEPTIDES_KEY;
use crate::store::{write_staged, StoreError};

/// One plotted line: `[milliseconds since epoch, value]` pairs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartSeries {
    pub key: String,
    pub values: Vec<(i64, FieldValue)>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chart {
    pub title: String,
    pub description: String,
    pub chart_data: Vec<ChartSeries>,
}

impl Chart {
    pub fn is_empty(&self) -> bool {
        self.chart_data.iter().all(|s| s.values.is_empty())
    }
}

/// The page heading
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChartTitle {
    pub title: String,
    pub description: String,
}

fn chart_point(rec: &Record, path: &ParamPath) -> Option<(i64, FieldValue)> {
    let value = match rec.get(path).ok()? {
        FieldValue::Null => FieldValue::Int(0),
        v @ (FieldValue::Int(_) | FieldValue::Float(_)) => v.clone(),
        _ => return None,
    };
    Some((rec.timestamp * 1000, value))
}

/// Build a chart with one series per parameter. Null values plot as zero; records
/// without a numeric value at the parameter's path are left out of its series.
pub fn make_chart(
    records: &[Record],
    parameters: &[Parameter],
    title: &str,
    description: &str,
) -> Chart {
    let chart_data = parameters
        .iter()
        .map(|param| ChartSeries {
            key: param.name.clone(),
            values: records
                .iter()
                .filter_map(|rec| chart_point(rec, &param.path))
                .collect(),
        })
        .collect();
    Chart {
        title: title.to_string(),
        description: description.to_string(),
        chart_data,
    }
}

/// One parameter per iRT peptide id at `peptides.<id>.<key>`, named by the id
pub fn pep_id_params<S: AsRef<str>>(peptide_ids: impl IntoIterator<Item = S>, key: &str) -> Vec<Parameter> {
    let mut params: Vec<Parameter> = peptide_ids
        .into_iter()
        .map(|id| {
            let id = id.as_ref();
            Parameter::new(id, [PEPTIDES_KEY, id, key].into_iter().collect())
        })
        .collect();
    params.sort_by(|a, b| a.name.cmp(&b.name));
    params
}

/// Render `value` as a JSONP script calling `callback`
pub fn to_jsonp<T: Serialize>(value: &T, callback: &str) -> Result<String, serde_json::Error> {
    Ok(format!("{callback}(\n{}\n);", serde_json::to_string(value)?))
}

pub fn write_jsonp<T: Serialize>(value: &T, path: &Path, callback: &str) -> Result<(), StoreError> {
    let text = to_jsonp(value, callback).map_err(|source| StoreError::JSONError {
        path: path.to_path_buf(),
        source,
    })?;
    write_staged(text.as_bytes(), path)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::dates::SourceDate;
    use crate::record::Fields;

    fn record(stamp: &str, entries: &[(&str, FieldValue)]) -> Record {
        let fields: Fields = entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        Record::new(format!("run_{stamp}"), SourceDate::from_text(stamp).unwrap(), fields)
    }

    #[test]
    fn test_make_chart() {
        let records = vec![
            record("150101120000", &[("Hela Target PSMs", FieldValue::Int(100))]),
            record("150102120000", &[("Hela Target PSMs", FieldValue::Null)]),
            record("150103120000", &[("Ecoli Target PSMs", FieldValue::Int(100))]),
            record("150104120000", &[("Hela Target PSMs", FieldValue::Text("n/a".into()))]),
        ];
        let chart = make_chart(
            &records,
            &[Parameter::new("Hela PSM", "Hela Target PSMs".into())],
            "Digest Peptide-Spectrum Matches",
            "",
        );
        let series = &chart.chart_data[0];
        assert_eq!(series.key, "Hela PSM");
        assert_eq!(
            series.values,
            vec![
                (1420113600000, FieldValue::Int(100)),
                (1420200000000, FieldValue::Int(0)),
            ]
        );
        assert!(!chart.is_empty());
    }

    #[test]
    fn test_pep_id_params() {
        let params = pep_id_params(["pep_k", "pep_b"], "RT");
        assert_eq!(params[0].name, "pep_b");
        assert_eq!(params[0].path.to_string(), "peptides.pep_b.RT");
        assert_eq!(params[1].name, "pep_k");
    }

    #[test]
    fn test_jsonp() {
        let title = ChartTitle {
            title: "qeplus".into(),
            description: "Thermo QExactive Plus".into(),
        };
        let text = to_jsonp(&title, "load_title").unwrap();
        assert_eq!(
            text,
            "load_title(\n{\"title\":\"qeplus\",\"description\":\"Thermo QExactive Plus\"}\n);"
        );

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("load_title.jsonp");
        write_jsonp(&title, &path, "load_title").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), text);
    }
}
