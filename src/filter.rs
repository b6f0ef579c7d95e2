//! Composable transforms over field streams.
//!
//! Each adapter consumes and returns a lazy iterator, so they chain like
//! any other iterator combinators:
//!
//! ```ignore
//! let fields = record.fields().filter_map(Result::ok);
//! for (name, value) in fields.drop_bad_values().fix_degrees().join_values(".") {
//!     println!("{name}: {value:?}");
//! }
//! ```

use std::collections::HashSet;

use crate::record::FieldValue;
use crate::value::Value;

/// Filter adapters over streams of [`FieldValue`]s.
pub trait Filters: Iterator<Item = FieldValue> + Sized {
    /// Drop fields whose slice held the 'invalid' pattern.
    fn drop_bad_values(self) -> impl Iterator<Item = FieldValue> {
        self.filter(|field| field.values.is_some())
    }

    /// Drop undocumented fields: names starting with an uppercase letter,
    /// or the `@start:finish` spans of anonymous slots.
    fn drop_unknown_fields(self) -> impl Iterator<Item = FieldValue> {
        self.filter(|field| {
            !field
                .name
                .starts_with(|c: char| c.is_uppercase() || c == '@')
        })
    }

    /// Convert fields recorded in semicircles to degrees.
    ///
    /// Idempotent: converted fields no longer carry the `semicircles`
    /// units, so a second pass leaves them alone.
    fn fix_degrees(self, units: impl Into<String>) -> impl Iterator<Item = FieldValue> {
        let units = units.into();
        self.map(move |mut field| {
            if field.units == "semicircles" {
                field.values = field.values.map(|values| {
                    values
                        .into_iter()
                        .map(Value::semicircles_to_degrees)
                        .collect()
                });
                field.units = units.clone();
            }
            field
        })
    }

    /// Drop repeated names, keeping each field's first occurrence.
    fn unique_names(self) -> impl Iterator<Item = FieldValue> {
        let mut seen = HashSet::new();
        self.filter(move |field| seen.insert(field.name.clone()))
    }

    /// Project away everything but the names.
    fn names(self) -> impl Iterator<Item = String> {
        self.map(|field| field.name)
    }

    /// Project away everything but the values.
    fn values(self) -> impl Iterator<Item = Option<Vec<Value>>> {
        self.map(|field| field.values)
    }

    /// Project away everything but the units.
    fn units(self) -> impl Iterator<Item = String> {
        self.map(|field| field.units)
    }

    /// Stringify each value with its units appended.
    fn append_units(self, separator: &str) -> impl Iterator<Item = (String, Option<Vec<String>>)> {
        let separator = separator.to_string();
        self.map(move |field| {
            let rendered = field.values.map(|values| {
                values
                    .iter()
                    .map(|value| {
                        if field.units.is_empty() {
                            value.to_string()
                        } else {
                            format!("{value}{separator}{}", field.units)
                        }
                    })
                    .collect()
            });
            (field.name, rendered)
        })
    }

    /// Stringify each value tuple, joined by a separator.
    fn join_values(self, separator: &str) -> impl Iterator<Item = (String, Option<String>)> {
        let separator = separator.to_string();
        self.map(move |field| {
            let rendered = field.values.map(|values| {
                values
                    .iter()
                    .map(Value::to_string)
                    .collect::<Vec<_>>()
                    .join(&separator)
            });
            (field.name, rendered)
        })
    }
}

impl<I: Iterator<Item = FieldValue>> Filters for I {}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(name: &str, values: Option<Vec<Value>>, units: &str) -> FieldValue {
        FieldValue {
            name: name.to_string(),
            values,
            units: units.to_string(),
        }
    }

    fn sample() -> Vec<FieldValue> {
        vec![
            field("position_lat", Some(vec![Value::Int(1 << 30)]), "semicircles"),
            field("heart_rate", None, "bpm"),
            field("@5:7", Some(vec![Value::Uint(3)]), ""),
            field("speed", Some(vec![Value::Float(2.5)]), "m/s"),
            field("speed", Some(vec![Value::Float(3.5)]), "m/s"),
        ]
    }

    #[test]
    fn bad_values_drop() {
        let names: Vec<_> = sample().into_iter().drop_bad_values().names().collect();
        assert_eq!(names, vec!["position_lat", "@5:7", "speed", "speed"]);
    }

    #[test]
    fn unknown_fields_drop() {
        let names: Vec<_> = sample().into_iter().drop_unknown_fields().names().collect();
        assert_eq!(names, vec!["position_lat", "heart_rate", "speed", "speed"]);
    }

    #[test]
    fn degrees_conversion_is_idempotent() {
        let once: Vec<_> = sample().into_iter().fix_degrees("°").collect();
        let twice: Vec<_> = once.clone().into_iter().fix_degrees("°").collect();

        assert_eq!(once, twice);
        assert_eq!(once[0].values, Some(vec![Value::Float(90.0)]));
        assert_eq!(once[0].units, "°");
        assert_eq!(once[3].units, "m/s");
    }

    #[test]
    fn duplicate_names_keep_the_first() {
        let speeds: Vec<_> = sample()
            .into_iter()
            .unique_names()
            .filter(|f| f.name == "speed")
            .collect();

        assert_eq!(speeds.len(), 1);
        assert_eq!(speeds[0].values, Some(vec![Value::Float(2.5)]));
    }

    #[test]
    fn adapters_compose_in_sequence() {
        let rendered: Vec<_> = sample()
            .into_iter()
            .drop_bad_values()
            .drop_unknown_fields()
            .unique_names()
            .append_units(" ")
            .collect();

        assert_eq!(
            rendered,
            vec![
                (
                    "position_lat".to_string(),
                    Some(vec!["1073741824 semicircles".to_string()])
                ),
                ("speed".to_string(), Some(vec!["2.5 m/s".to_string()])),
            ]
        );
    }

    #[test]
    fn tuples_join_with_a_separator() {
        let fields = vec![field(
            "gears",
            Some(vec![Value::Uint(2), Value::Uint(11)]),
            "",
        )];
        let rendered: Vec<_> = fields.into_iter().join_values(".").collect();

        assert_eq!(rendered, vec![("gears".to_string(), Some("2.11".to_string()))]);
    }
}
