//! Builds a profile from spreadsheet-shaped CSV, the way a profile importer
//! feeds the decoder, and decodes against it.

use std::collections::BTreeMap;

use cassette::profile::{Field, MessageBuilder, Messages, Profile, Types};
use cassette::stream::check::checksum;
use cassette::{Decoder, Value};

const TYPES_CSV: &str = "\
type_name,base_type,value_name,value
sport,enum,running,1
sport,enum,cycling,2
";

const MESSAGES_CSV: &str = "\
message,number,field,name,type,units,scale,offset,accumulate
record,20,253,timestamp,date_time,s,,,
record,20,2,altitude,uint16,m,5,500,
record,20,5,distance,uint32,m,,,true
session,18,5,sport,sport,,,,
";

fn load_types() -> Types {
    let mut types = Types::new();

    let mut mappings: BTreeMap<(String, String), Vec<(String, i64)>> = BTreeMap::new();
    let mut reader = csv::ReaderBuilder::new().from_reader(TYPES_CSV.as_bytes());
    for row in reader.records() {
        let row = row.unwrap();
        mappings
            .entry((row[0].to_string(), row[1].to_string()))
            .or_default()
            .push((row[2].to_string(), row[3].parse().unwrap()));
    }

    for ((name, base), entries) in mappings {
        let base = types.get(&base).unwrap().base();
        let entries: Vec<(&str, i64)> = entries.iter().map(|(n, v)| (n.as_str(), *v)).collect();
        types.insert_mapping(&name, base, &entries).unwrap();
    }

    types
}

fn load_profile() -> Profile {
    let mut types = load_types();

    let mut rows: BTreeMap<(String, u16), Vec<Field>> = BTreeMap::new();
    let mut reader = csv::ReaderBuilder::new().from_reader(MESSAGES_CSV.as_bytes());
    for row in reader.records() {
        let row = row.unwrap();

        let type_ = types.get_or_derive(&row[4]).unwrap();
        let mut field = Field::new(row[2].parse().unwrap(), &row[3], type_).with_units(&row[5]);
        if let Ok(scale) = row[6].parse::<f64>() {
            field = field.with_scale(scale);
        }
        if let Ok(offset) = row[7].parse::<f64>() {
            field = field.with_offset(offset);
        }
        if &row[8] == "true" {
            field = field.accumulated();
        }

        rows.entry((row[0].to_string(), row[1].parse().unwrap()))
            .or_default()
            .push(field);
    }

    let mut messages = Messages::new();
    for ((name, number), fields) in rows {
        let mut builder = MessageBuilder::new(name, Some(number));
        for field in fields {
            builder = builder.field(field);
        }
        messages.insert(builder.build().unwrap()).unwrap();
    }

    Profile::new(types, messages)
}

/// Frame a record section into a document with valid header and CRCs.
fn document(records: &[u8]) -> Vec<u8> {
    let mut buffer = vec![0x0E, 0x10, 0x64, 0x00];
    buffer.extend_from_slice(&(records.len() as u32).to_le_bytes());
    buffer.extend_from_slice(b".FIT");
    let head = checksum(0, &buffer);
    buffer.extend_from_slice(&head.to_le_bytes());
    buffer.extend_from_slice(records);
    let tail = checksum(0, &buffer);
    buffer.extend_from_slice(&tail.to_le_bytes());
    buffer
}

#[test]
fn an_imported_profile_drives_a_full_decode() {
    let profile = load_profile();
    let data = document(&[
        0x40, // definition, local 0: record
        0x00, 0x00, 20, 0x00, 3, // three fields
        253, 4, 0x86, // timestamp
        2, 2, 0x84, // altitude
        5, 4, 0x86, // distance
        0x00, // data
        0x10, 0x20, 0x30, 0x40, // timestamp 0x40302010
        0x58, 0x1B, // altitude raw 7000
        100, 0x00, 0x00, 0x00, // distance 100
        0x00, // data
        0x11, 0x20, 0x30, 0x40, // timestamp
        0x58, 0x1B, // altitude raw 7000
        20, 0x00, 0x00, 0x00, // distance 20, total 120
        0x41, // definition, local 1: session
        0x00, 0x00, 18, 0x00, 1, // one field
        5, 1, 0x00, // sport
        0x01, // data
        0x02, // cycling
    ]);

    let mut decoder = Decoder::new(&profile, &data).unwrap();

    let mut record = decoder.next_record().unwrap().unwrap();
    assert_eq!(record.name(), "record");
    let fields: Vec<_> = record.fields().collect::<Result<_, _>>().unwrap();
    assert!(matches!(fields[0].values, Some(ref v) if matches!(v[0], Value::Time(_))));
    assert_eq!(fields[1].values, Some(vec![Value::Float(900.0)]));
    assert_eq!(fields[1].units, "m");
    assert_eq!(fields[2].values, Some(vec![Value::Uint(100)]));
    drop(record);

    let mut record = decoder.next_record().unwrap().unwrap();
    let fields: Vec<_> = record.fields().collect::<Result<_, _>>().unwrap();
    assert_eq!(fields[2].values, Some(vec![Value::Uint(120)]));
    drop(record);

    let mut record = decoder.next_record().unwrap().unwrap();
    assert_eq!(record.name(), "session");
    let fields: Vec<_> = record.fields().collect::<Result<_, _>>().unwrap();
    assert_eq!(fields[0].name, "sport");
    assert_eq!(fields[0].values, Some(vec![Value::Name("cycling".into())]));
}
