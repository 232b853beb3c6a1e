//! The flat genealogy export format.
//!
//! Exports carry one row per person with numbered marriage columns
//! (`MARR.SPOU.#REFN.1` … `.4`). Relations are stored normalized, so the
//! flat fields are produced on read and resolved back into relations on
//! import.

use std::collections::{BTreeSet, HashMap};

use serde_json::{Map, Value};
use uuid::Uuid;

use crate::ancestors::person::{Confidentiality, PersonFields};
use crate::ancestors::relation::{FamilyStatus, RelationRecord};
use crate::ancestors::visibility::{PersonDetail, RelativeRef};

/// Marriages beyond this position have no columns in the flat format.
pub const LEGACY_MARRIAGE_SLOTS: usize = 4;

/// Export header to field name.
pub const LEGACY_COLUMNS: &[(&str, &str)] = &[
    ("#REFN", "refn"),
    ("NAME", "name"),
    ("FATH.NAME", "fath_name"),
    ("FATH.#REFN", "fath_refn"),
    ("MOTH.NAME", "moth_name"),
    ("MOTH.#REFN", "moth_refn"),
    ("_UID", "uid"),
    ("SURN", "surn"),
    ("GIVN", "givn"),
    ("SEX", "sex"),
    ("OCCU", "occu"),
    ("CHAN.DATE", "chan_date"),
    ("CHAN.DATE.TIME", "chan_date_time"),
    ("BIRT.DATE", "birt_date"),
    ("BIRT.PLAC", "birt_plac"),
    ("DEAT.DATE", "deat_date"),
    ("DEAT.PLAC", "deat_plac"),
    ("NOTE", "note"),
    ("CHR.DATE", "chr_date"),
    ("CHR.PLAC", "chr_plac"),
    ("BURI.DATE", "buri_date"),
    ("BURI.PLAC", "buri_plac"),
    ("NAME._RUFNAME", "name_rufname"),
    ("NAME.NPFX", "name_npfx"),
    ("SOUR", "sour"),
    ("NAME.NICK", "name_nick"),
    ("NAME._MARNM", "name_marnm"),
    ("CHR.ADDR", "chr_addr"),
    ("RELI", "reli"),
    ("MARR.SPOU.NAME.1", "marr_spou_name_1"),
    ("MARR.SPOU.#REFN.1", "marr_spou_refn_1"),
    ("FAM.HUSB.1", "fam_husb_1"),
    ("FAM.WIFE.1", "fam_wife_1"),
    ("MARR.DATE.1", "marr_date_1"),
    ("MARR.PLAC.1", "marr_plac_1"),
    ("FAM.CHIL.1", "fam_chil_1"),
    ("FAM.MARR.1", "fam_marr_1"),
    ("FAM._STAT.1", "fam_stat_1"),
    ("FAM._MARR.1", "fam_marr_1"),
    ("MARR.SPOU.NAME.2", "marr_spou_name_2"),
    ("MARR.SPOU.#REFN.2", "marr_spou_refn_2"),
    ("FAM.HUSB.2", "fam_husb_2"),
    ("FAM.WIFE.2", "fam_wife_2"),
    ("MARR.DATE.2", "marr_date_2"),
    ("MARR.PLAC.2", "marr_plac_2"),
    ("FAM.CHIL.2", "fam_chil_2"),
    ("FAM.MARR.2", "fam_marr_2"),
    ("FAM._STAT.2", "fam_stat_2"),
    ("FAM._MARR.2", "fam_marr_2"),
    ("MARR.SPOU.NAME.3", "marr_spou_name_3"),
    ("MARR.SPOU.#REFN.3", "marr_spou_refn_3"),
    ("FAM.HUSB.3", "fam_husb_3"),
    ("FAM.WIFE.3", "fam_wife_3"),
    ("MARR.DATE.3", "marr_date_3"),
    ("MARR.PLAC.3", "marr_plac_3"),
    ("FAM.CHIL.3", "fam_chil_3"),
    ("FAM.MARR.3", "fam_marr_3"),
    ("FAM._STAT.3", "fam_stat_3"),
    ("FAM._MARR.3", "fam_marr_3"),
    ("MARR.SPOU.NAME.4", "marr_spou_name_4"),
    ("MARR.SPOU.#REFN.4", "marr_spou_refn_4"),
    ("FAM.HUSB.4", "fam_husb_4"),
    ("FAM.WIFE.4", "fam_wife_4"),
    ("MARR.DATE.4", "marr_date_4"),
    ("MARR.PLAC.4", "marr_plac_4"),
    ("FAM.CHIL.4", "fam_chil_4"),
    ("FAM.MARR.4", "fam_marr_4"),
    ("FAM._STAT.4", "fam_stat_4"),
    ("FAM._MARR.4", "fam_marr_4"),
    ("OBJE.FILE.1", "obje_file_1"),
    ("OBJE.TITL.1", "obje_titl_1"),
    ("OBJE.FILE.2", "obje_file_2"),
    ("OBJE.TITL.2", "obje_titl_2"),
    ("OBJE.FILE.3", "obje_file_3"),
    ("OBJE.TITL.3", "obje_titl_3"),
    ("OBJE.FILE.4", "obje_file_4"),
    ("OBJE.TITL.4", "obje_titl_4"),
    ("OBJE.FILE.5", "obje_file_5"),
    ("OBJE.TITL.5", "obje_titl_5"),
    ("OBJE.FILE.6", "obje_file_6"),
    ("OBJE.TITL.6", "obje_titl_6"),
];

/// Resolves an export header, or an already mapped field name, to the
/// field name it fills.
pub fn field_for_header(header: &str) -> Option<&'static str> {
    let header = header.trim().trim_start_matches('\u{feff}');
    LEGACY_COLUMNS
        .iter()
        .find(|(column, field)| *column == header || field.eq_ignore_ascii_case(header))
        .map(|(_, field)| *field)
}

/// Flat relation fields of a person: `fath_*`, `moth_*` and the numbered
/// marriage columns for the first four marriages.
pub fn flat_relations(
    record: Option<&RelationRecord>,
    relatives: &HashMap<Uuid, RelativeRef>,
) -> Map<String, Value> {
    let mut flat = Map::new();
    let reference = |id: Option<Uuid>| -> (String, String) {
        id.and_then(|id| relatives.get(&id))
            .map(|relative| (relative.refn.clone(), relative.name.clone()))
            .unwrap_or_default()
    };

    let (fath_refn, fath_name) = reference(record.and_then(|record| record.father_id));
    let (moth_refn, moth_name) = reference(record.and_then(|record| record.mother_id));
    flat.insert("fath_refn".into(), Value::String(fath_refn));
    flat.insert("fath_name".into(), Value::String(fath_name));
    flat.insert("moth_refn".into(), Value::String(moth_refn));
    flat.insert("moth_name".into(), Value::String(moth_name));

    let marriages = record.map(|record| record.marriages.as_slice()).unwrap_or_default();
    for slot in 1..=LEGACY_MARRIAGE_SLOTS {
        let marriage = marriages.get(slot - 1);
        let (spouse_refn, spouse_name) = reference(marriage.and_then(|m| m.spouse_id));
        let children: Vec<String> = marriage
            .map(|m| {
                m.children
                    .iter()
                    .filter_map(|child| relatives.get(child))
                    .map(|child| child.refn.clone())
                    .filter(|refn| !refn.is_empty())
                    .collect()
            })
            .unwrap_or_default();
        let text = |value: Option<&String>| Value::String(value.cloned().unwrap_or_default());

        flat.insert(format!("marr_spou_refn_{slot}"), Value::String(spouse_refn));
        flat.insert(format!("marr_spou_name_{slot}"), Value::String(spouse_name));
        flat.insert(
            format!("marr_date_{slot}"),
            text(marriage.and_then(|m| m.marriage_date.as_ref())),
        );
        flat.insert(
            format!("marr_plac_{slot}"),
            text(marriage.and_then(|m| m.marriage_place.as_ref())),
        );
        flat.insert(
            format!("fam_stat_{slot}"),
            Value::String(
                marriage
                    .and_then(|m| m.family_status)
                    .map(|status| status.as_str().to_string())
                    .unwrap_or_default(),
            ),
        );
        flat.insert(format!("fam_chil_{slot}"), Value::String(children.join(",")));
    }
    flat
}

/// The complete flat record of a person: its tiered detail fields merged
/// with the computed relation columns. Relation columns of confidential
/// persons are blank.
pub fn legacy_record(
    detail: &PersonDetail,
    record: Option<&RelationRecord>,
    relatives: &HashMap<Uuid, RelativeRef>,
) -> Map<String, Value> {
    let mut flat = match serde_json::to_value(detail) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    };
    let record = record.filter(|_| detail.confidential == Confidentiality::No);
    flat.extend(flat_relations(record, relatives));
    flat
}

/// Every person id a flat view of `record` needs a name for.
pub fn referenced_ids(record: &RelationRecord) -> Vec<Uuid> {
    let mut ids: BTreeSet<Uuid> = BTreeSet::new();
    ids.extend(record.father_id);
    ids.extend(record.mother_id);
    for marriage in record.marriages.iter().take(LEGACY_MARRIAGE_SLOTS) {
        ids.extend(marriage.spouse_id);
        ids.extend(marriage.children.iter().copied());
    }
    ids.into_iter().collect()
}

/// One marriage column group of an import row, referencing the spouse by
/// refn.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportedMarriage {
    pub spouse_refn: Option<String>,
    pub date: Option<String>,
    pub place: Option<String>,
    pub status: Option<FamilyStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportRow {
    pub refn: Option<String>,
    pub confidential: Option<Confidentiality>,
    pub fields: PersonFields,
    pub fath_refn: Option<String>,
    pub moth_refn: Option<String>,
    pub marriages: Vec<ImportedMarriage>,
}

impl ImportRow {
    /// Builds a row from `(field, value)` pairs. Fields the person model
    /// does not know are ignored.
    pub fn from_fields<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let mut row = ImportRow {
            marriages: vec![ImportedMarriage::default(); LEGACY_MARRIAGE_SLOTS],
            ..ImportRow::default()
        };
        for (field, raw) in pairs {
            let value = Some(raw.trim())
                .filter(|value| !value.is_empty())
                .map(str::to_string);
            match field {
                "refn" => row.refn = value,
                "fath_refn" => row.fath_refn = value,
                "moth_refn" => row.moth_refn = value,
                "confidential" => {
                    row.confidential = value.as_deref().and_then(Confidentiality::parse)
                }
                other if row.fields.set(other, value.clone()) => {}
                other => {
                    if let Some((name, slot)) = numbered(other) {
                        let marriage = &mut row.marriages[slot - 1];
                        match name {
                            "marr_spou_refn" => marriage.spouse_refn = value,
                            "marr_date" => marriage.date = value,
                            "marr_plac" => marriage.place = value,
                            "fam_stat" => {
                                marriage.status = value.as_deref().and_then(FamilyStatus::parse)
                            }
                            _ => {}
                        }
                    }
                }
            }
        }
        while row
            .marriages
            .last()
            .map(|marriage| *marriage == ImportedMarriage::default())
            .unwrap_or(false)
        {
            row.marriages.pop();
        }
        row
    }
}

/// Splits `marr_date_3` into `("marr_date", 3)` for slots 1 to 4.
fn numbered(field: &str) -> Option<(&str, usize)> {
    let (name, slot) = field.rsplit_once('_')?;
    let slot: usize = slot.parse().ok()?;
    if (1..=LEGACY_MARRIAGE_SLOTS).contains(&slot) {
        Some((name, slot))
    } else {
        None
    }
}
