use anyhow::{Context, Result};
use arrow::{
    array::{ArrayRef, BooleanArray, Date32Array, Float64Array, StringArray},
    datatypes::{DataType, Field, Schema},
    record_batch::RecordBatch,
};
use std::sync::Arc;

use crate::process::date_parser::{date32, parse_flexible_date};
use crate::process::utils::{infer_arrow_dtype_from_str, parse_number};

/// How a string column becomes its final Arrow type.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Conversion {
    /// Float64 when every present value parses, else Utf8.
    Infer,
    Text,
    /// Float64; unparseable values become null.
    Float,
    /// Boolean when every present value is `Y` or `N`; otherwise Utf8 with
    /// the codes left as they are.
    YesNo,
    /// Code → label; codes missing from the table pass through unchanged.
    Lookup(&'static [(&'static str, &'static str)]),
    /// Utf8 normalised to `YYYY-MM-DD`; unparseable values become null.
    IsoDate,
    Date32,
}

fn text_array(values: &[Option<String>]) -> ArrayRef {
    Arc::new(values.iter().map(|v| v.as_deref()).collect::<StringArray>())
}

fn float_array(values: &[Option<String>]) -> ArrayRef {
    Arc::new(
        values
            .iter()
            .map(|v| v.as_deref().and_then(parse_number))
            .collect::<Float64Array>(),
    )
}

pub fn yes_no(v: &str) -> Option<bool> {
    match v {
        "Y" => Some(true),
        "N" => Some(false),
        _ => None,
    }
}

pub fn lookup<'a>(table: &'static [(&'static str, &'static str)], code: &'a str) -> &'a str {
    table
        .iter()
        .find(|(k, _)| *k == code)
        .map(|(_, label)| *label)
        .unwrap_or(code)
}

/// Convert one cleaned string column.
pub fn convert_column(
    name: &str,
    values: &[Option<String>],
    conversion: &Conversion,
) -> (Field, ArrayRef) {
    let (data_type, array) = match conversion {
        Conversion::Infer => {
            let mut present = values.iter().flatten().peekable();
            let numeric = present.peek().is_some()
                && present.all(|v| infer_arrow_dtype_from_str(v) == DataType::Float64);
            if numeric {
                (DataType::Float64, float_array(values))
            } else {
                (DataType::Utf8, text_array(values))
            }
        }
        Conversion::Text => (DataType::Utf8, text_array(values)),
        Conversion::Float => (DataType::Float64, float_array(values)),
        Conversion::YesNo => {
            if values.iter().flatten().all(|v| yes_no(v).is_some()) {
                let arr: BooleanArray = values
                    .iter()
                    .map(|v| v.as_deref().and_then(yes_no))
                    .collect();
                (DataType::Boolean, Arc::new(arr) as ArrayRef)
            } else {
                (DataType::Utf8, text_array(values))
            }
        }
        Conversion::Lookup(table) => {
            let arr: StringArray = values
                .iter()
                .map(|v| v.as_deref().map(|code| lookup(table, code)))
                .collect();
            (DataType::Utf8, Arc::new(arr) as ArrayRef)
        }
        Conversion::IsoDate => {
            let arr: StringArray = values
                .iter()
                .map(|v| {
                    v.as_deref()
                        .and_then(parse_flexible_date)
                        .map(|d| d.format("%Y-%m-%d").to_string())
                })
                .collect();
            (DataType::Utf8, Arc::new(arr) as ArrayRef)
        }
        Conversion::Date32 => {
            let arr: Date32Array = values
                .iter()
                .map(|v| v.as_deref().and_then(parse_flexible_date).map(date32))
                .collect();
            (DataType::Date32, Arc::new(arr) as ArrayRef)
        }
    };
    (Field::new(name, data_type, true), array)
}

/// Assemble named columns into a batch.
pub fn batch_from_columns(cols: Vec<(Field, ArrayRef)>) -> Result<RecordBatch> {
    let (fields, arrays): (Vec<Field>, Vec<ArrayRef>) = cols.into_iter().unzip();
    let schema = Arc::new(Schema::new(fields));
    if arrays.is_empty() {
        return Ok(RecordBatch::new_empty(schema));
    }
    RecordBatch::try_new(schema, arrays).context("assembling record batch")
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::Array;

    fn col(vals: &[&str]) -> Vec<Option<String>> {
        vals.iter()
            .map(|v| if v.is_empty() { None } else { Some(v.to_string()) })
            .collect()
    }

    #[test]
    fn infer_and_coerce() {
        let (field, _) = convert_column("a", &col(&["1", "2.5", ""]), &Conversion::Infer);
        assert_eq!(field.data_type(), &DataType::Float64);
        let (field, _) = convert_column("b", &col(&["1", "x"]), &Conversion::Infer);
        assert_eq!(field.data_type(), &DataType::Utf8);
        let (field, _) = convert_column("c", &col(&["", ""]), &Conversion::Infer);
        assert_eq!(field.data_type(), &DataType::Utf8);

        let (_, arr) = convert_column("d", &col(&["1", "x"]), &Conversion::Float);
        let arr = arr.as_any().downcast_ref::<Float64Array>().unwrap();
        assert_eq!(arr.value(0), 1.0);
        assert!(arr.is_null(1));
    }

    #[test]
    fn lookups_pass_unknown_codes_through() {
        const TABLE: &[(&str, &str)] = &[("P", "put"), ("C", "call")];
        let (_, arr) = convert_column("t", &col(&["P", "C", "Z", ""]), &Conversion::Lookup(TABLE));
        let arr = arr.as_any().downcast_ref::<StringArray>().unwrap();
        assert_eq!(arr.value(0), "put");
        assert_eq!(arr.value(1), "call");
        assert_eq!(arr.value(2), "Z");
        assert!(arr.is_null(3));
    }

    #[test]
    fn yes_no_and_dates() {
        let (field, arr) = convert_column("f", &col(&["Y", "N", ""]), &Conversion::YesNo);
        assert_eq!(field.data_type(), &DataType::Boolean);
        let arr = arr.as_any().downcast_ref::<BooleanArray>().unwrap();
        assert!(arr.value(0));
        assert!(!arr.value(1));
        assert!(arr.is_null(2));

        let (_, arr) = convert_column("d", &col(&["06/13/2024", "bad"]), &Conversion::IsoDate);
        let arr = arr.as_any().downcast_ref::<StringArray>().unwrap();
        assert_eq!(arr.value(0), "2024-06-13");
        assert!(arr.is_null(1));
    }

    #[test]
    fn other_flag_codes_are_kept() {
        let (field, arr) = convert_column("f", &col(&["Y", "N", "?", ""]), &Conversion::YesNo);
        assert_eq!(field.data_type(), &DataType::Utf8);
        let arr = arr.as_any().downcast_ref::<StringArray>().unwrap();
        assert_eq!(arr.value(0), "Y");
        assert_eq!(arr.value(1), "N");
        assert_eq!(arr.value(2), "?");
        assert!(arr.is_null(3));
    }
}
