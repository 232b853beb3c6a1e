//! Loading a flat genealogy export into the tree.
//!
//! Persons are upserted by refn first; relations are saved in a second
//! pass so every refn a row points at can be resolved.

use std::collections::HashMap;
use std::io::Read;

use diesel::pg::PgConnection;
use diesel::prelude::*;
use tracing::{info, warn};
use uuid::Uuid;

use crate::ancestors::legacy::{field_for_header, ImportRow};
use crate::ancestors::person::{insert_person, update_person, Confidentiality};
use crate::ancestors::relation::{MarriageInput, RelationInput};
use crate::ancestors::sync::save_relation;
use crate::models::Person;
use crate::schema::persons;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub relations: usize,
}

/// Parses an export. Columns that map to no field are dropped.
pub fn read_rows<R: Read>(reader: R, delimiter: u8) -> Result<Vec<ImportRow>, csv::Error> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .from_reader(reader);
    let fields: Vec<Option<&'static str>> = reader
        .headers()?
        .iter()
        .map(field_for_header)
        .collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let pairs = fields
            .iter()
            .zip(record.iter())
            .filter_map(|(field, value)| field.map(|field| (field, value)));
        rows.push(ImportRow::from_fields(pairs));
    }
    Ok(rows)
}

/// Children of `parent` with `spouse`: rows whose parents are exactly the
/// two, or only `parent` when the marriage has no spouse.
fn children_of<'a>(rows: &'a [ImportRow], parent: &str, spouse: Option<&str>) -> Vec<&'a str> {
    rows.iter()
        .filter_map(|row| {
            let refn = row.refn.as_deref()?;
            let father = row.fath_refn.as_deref();
            let mother = row.moth_refn.as_deref();
            let matches = match spouse {
                Some(spouse) => {
                    (father == Some(parent) && mother == Some(spouse))
                        || (father == Some(spouse) && mother == Some(parent))
                }
                None => {
                    (father == Some(parent) && mother.is_none())
                        || (mother == Some(parent) && father.is_none())
                }
            };
            matches.then_some(refn)
        })
        .collect()
}

/// Partners `refn` has children with according to the child rows but whose
/// marriage `listed` does not contain. `None` stands for an unknown partner.
fn implied_partners<'a>(
    rows: &'a [ImportRow],
    refn: &str,
    listed: &[Option<&str>],
) -> Vec<Option<&'a str>> {
    let mut partners: Vec<Option<&'a str>> = Vec::new();
    for row in rows {
        let father = row.fath_refn.as_deref();
        let mother = row.moth_refn.as_deref();
        let partner = if father == Some(refn) {
            mother
        } else if mother == Some(refn) {
            father
        } else {
            continue;
        };
        if !listed.contains(&partner) && !partners.contains(&partner) {
            partners.push(partner);
        }
    }
    partners
}

fn relation_input(
    row: &ImportRow,
    refn: &str,
    rows: &[ImportRow],
    ids: &HashMap<String, Uuid>,
) -> RelationInput {
    let resolve = |refn: Option<&str>| refn.and_then(|refn| ids.get(refn).copied());
    let children_with = |spouse: Option<&str>| -> Vec<Uuid> {
        children_of(rows, refn, spouse)
            .into_iter()
            .filter_map(|child| ids.get(child).copied())
            .collect()
    };

    let mut marriages: Vec<MarriageInput> = row
        .marriages
        .iter()
        .map(|marriage| MarriageInput {
            spouse_id: resolve(marriage.spouse_refn.as_deref()),
            marriage_date: marriage.date.clone(),
            marriage_place: marriage.place.clone(),
            family_status: marriage.status,
            children: children_with(marriage.spouse_refn.as_deref()),
        })
        .collect();

    // Child rows can name a couple the parent's own row leaves out. Saving
    // the parent without it would unlink those children again.
    let listed: Vec<Option<&str>> = row
        .marriages
        .iter()
        .map(|marriage| marriage.spouse_refn.as_deref())
        .collect();
    for partner in implied_partners(rows, refn, &listed) {
        let children = children_with(partner);
        if !children.is_empty() {
            marriages.push(MarriageInput {
                spouse_id: resolve(partner),
                children,
                ..MarriageInput::default()
            });
        }
    }

    RelationInput {
        father_id: resolve(row.fath_refn.as_deref()),
        mother_id: resolve(row.moth_refn.as_deref()),
        marriages,
    }
}

/// Upserts the rows and rebuilds their relations. Rows without a refn or
/// with invalid values are skipped. `default_family` fills `family_1` of
/// rows that name no family.
pub fn import_rows(
    conn: &mut PgConnection,
    mut rows: Vec<ImportRow>,
    known_families: &[String],
    default_family: Option<&str>,
) -> QueryResult<ImportSummary> {
    let mut summary = ImportSummary::default();
    let mut ids: HashMap<String, Uuid> = HashMap::new();

    for row in &mut rows {
        let Some(refn) = row.refn.clone() else {
            summary.skipped += 1;
            continue;
        };
        if row.fields.family_1.is_none() && row.fields.family_2.is_none() {
            row.fields.family_1 = default_family.map(str::to_string);
        }
        if let Err(err) = row.fields.validate(known_families) {
            warn!(refn = %refn, error = %err, "skipping import row");
            summary.skipped += 1;
            continue;
        }

        let existing: Option<Person> = persons::table
            .filter(persons::refn.eq(&refn))
            .select(Person::as_select())
            .first(conn)
            .optional()?;
        let person = match existing {
            Some(existing) => {
                let confidential = row
                    .confidential
                    .unwrap_or_else(|| Confidentiality::of(&existing));
                summary.updated += 1;
                update_person(
                    conn,
                    &existing,
                    refn.clone(),
                    confidential,
                    row.fields.clone(),
                    None,
                )?
            }
            None => {
                summary.created += 1;
                insert_person(
                    conn,
                    Some(refn.clone()),
                    row.confidential.unwrap_or(Confidentiality::No),
                    row.fields.clone(),
                    None,
                )?
            }
        };
        ids.insert(refn, person.id);
    }

    for row in &rows {
        let Some(refn) = row.refn.as_deref() else {
            continue;
        };
        let Some(person_id) = ids.get(refn).copied() else {
            continue;
        };
        let input = relation_input(row, refn, &rows, &ids);
        if input == RelationInput::default() {
            continue;
        }
        save_relation(conn, person_id, input)?;
        summary.relations += 1;
    }

    info!(
        created = summary.created,
        updated = summary.updated,
        skipped = summary.skipped,
        relations = summary.relations,
        "import finished"
    );
    Ok(summary)
}
