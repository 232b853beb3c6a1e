//! Person reads with confidentiality applied.
//!
//! This module owns the read paths for persons. Callers get a
//! [`PersonDetail`] or [`PersonSummary`] whose hidden fields are already
//! blanked, never a raw row.

use std::collections::{HashMap, HashSet};

use chrono::{NaiveDate, NaiveDateTime};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use serde::{Serialize, Serializer};
use uuid::Uuid;

use crate::access::Viewer;
use crate::ancestors::person::Confidentiality;
use crate::ancestors::relation::{self, FamilyStatus, RelationRecord};
use crate::attachments::{self, MediaLink, OwnerKind};
use crate::models::Person;
use crate::schema::persons;
use crate::scope_to_families;

pub const CONFIDENTIAL_NAME: &str = "vertraulich";

/// A field that is either blanked to `""` or shown as stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Masked<T> {
    Hidden,
    Shown(Option<T>),
}

impl<T> Masked<T> {
    pub fn shown(&self) -> Option<&T> {
        match self {
            Masked::Shown(value) => value.as_ref(),
            Masked::Hidden => None,
        }
    }

    pub fn is_hidden(&self) -> bool {
        matches!(self, Masked::Hidden)
    }
}

impl<T: Serialize> Serialize for Masked<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Masked::Hidden => serializer.serialize_str(""),
            Masked::Shown(value) => value.serialize(serializer),
        }
    }
}

struct Mask {
    hide: bool,
}

impl Mask {
    fn apply<T: Clone>(&self, value: &Option<T>) -> Masked<T> {
        if self.hide {
            Masked::Hidden
        } else {
            Masked::Shown(value.clone())
        }
    }
}

/// The name a viewer gets to see for a person of the given tier.
pub fn tiered_name(confidentiality: Confidentiality, name: &str) -> String {
    match confidentiality {
        Confidentiality::Yes => CONFIDENTIAL_NAME.to_string(),
        Confidentiality::Restricted | Confidentiality::No => name.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PersonSummary {
    pub id: Uuid,
    pub name: String,
    pub surn: Masked<String>,
    pub givn: Masked<String>,
}

impl PersonSummary {
    pub fn from_person(person: &Person) -> Self {
        let confidentiality = Confidentiality::of(person);
        let mask = Mask {
            hide: confidentiality != Confidentiality::No,
        };
        Self {
            id: person.id,
            name: tiered_name(confidentiality, &person.name),
            surn: mask.apply(&person.surn),
            givn: mask.apply(&person.givn),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PersonDetail {
    pub id: Uuid,
    pub refn: Masked<String>,
    pub name: String,
    pub uid: Masked<String>,
    pub surn: Masked<String>,
    pub givn: Masked<String>,
    pub sex: Masked<String>,
    pub occu: Masked<String>,
    pub chan_date: Masked<String>,
    pub chan_date_time: Masked<String>,
    pub birt_date: Masked<String>,
    pub birth_date_formatted: Masked<NaiveDate>,
    pub birt_plac: Masked<String>,
    pub deat_date: Masked<String>,
    pub death_date_formatted: Masked<NaiveDate>,
    pub deat_plac: Masked<String>,
    pub note: Masked<String>,
    pub chr_date: Masked<String>,
    pub chr_plac: Masked<String>,
    pub chr_addr: Masked<String>,
    pub buri_date: Masked<String>,
    pub buri_plac: Masked<String>,
    pub name_rufname: Masked<String>,
    pub name_npfx: Masked<String>,
    pub name_nick: Masked<String>,
    pub name_marnm: Masked<String>,
    pub sour: Masked<String>,
    pub reli: Masked<String>,
    pub family_1: Masked<String>,
    pub family_2: Masked<String>,
    pub images: Masked<Vec<MediaLink>>,
    pub created_at: Masked<NaiveDateTime>,
    pub updated_at: Masked<NaiveDateTime>,
    pub confidential: Confidentiality,
}

impl PersonDetail {
    pub fn build(person: &Person, images: Vec<MediaLink>) -> Self {
        let confidentiality = Confidentiality::of(person);
        let mask = Mask {
            hide: confidentiality != Confidentiality::No,
        };
        Self {
            id: person.id,
            refn: mask.apply(&Some(person.refn.clone())),
            name: tiered_name(confidentiality, &person.name),
            uid: mask.apply(&person.uid),
            surn: mask.apply(&person.surn),
            givn: mask.apply(&person.givn),
            sex: mask.apply(&person.sex),
            occu: mask.apply(&person.occu),
            chan_date: mask.apply(&person.chan_date),
            chan_date_time: mask.apply(&person.chan_date_time),
            birt_date: mask.apply(&person.birt_date),
            birth_date_formatted: mask.apply(&person.birth_date_formatted),
            birt_plac: mask.apply(&person.birt_plac),
            deat_date: mask.apply(&person.deat_date),
            death_date_formatted: mask.apply(&person.death_date_formatted),
            deat_plac: mask.apply(&person.deat_plac),
            note: mask.apply(&person.note),
            chr_date: mask.apply(&person.chr_date),
            chr_plac: mask.apply(&person.chr_plac),
            chr_addr: mask.apply(&person.chr_addr),
            buri_date: mask.apply(&person.buri_date),
            buri_plac: mask.apply(&person.buri_plac),
            name_rufname: mask.apply(&person.name_rufname),
            name_npfx: mask.apply(&person.name_npfx),
            name_nick: mask.apply(&person.name_nick),
            name_marnm: mask.apply(&person.name_marnm),
            sour: mask.apply(&person.sour),
            reli: mask.apply(&person.reli),
            family_1: mask.apply(&person.family_1),
            family_2: mask.apply(&person.family_2),
            images: mask.apply(&Some(images)),
            created_at: mask.apply(&Some(person.created_at)),
            updated_at: mask.apply(&Some(person.updated_at)),
            confidential: confidentiality,
        }
    }
}

/// Identity of a relative as shown inside another person's relation view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelativeRef {
    pub id: Uuid,
    pub refn: String,
    pub name: String,
}

fn visible_persons<'a>(viewer: &Viewer) -> persons::BoxedQuery<'a, diesel::pg::Pg> {
    scope_to_families!(persons::table.into_boxed(), viewer, persons)
}

/// Persons visible to `viewer`, ordered by name. `search` matches name,
/// surname or given name case-insensitively.
pub fn list_persons(
    conn: &mut PgConnection,
    viewer: &Viewer,
    search: Option<&str>,
) -> QueryResult<Vec<PersonSummary>> {
    let mut query = visible_persons(viewer);
    if let Some(term) = search.map(str::trim).filter(|term| !term.is_empty()) {
        let pattern = format!("%{term}%");
        query = query.filter(
            persons::name
                .ilike(pattern.clone())
                .or(persons::surn.ilike(pattern.clone()))
                .or(persons::givn.ilike(pattern)),
        );
    }
    let rows: Vec<Person> = query
        .order((persons::name.asc(), persons::refn.asc()))
        .select(Person::as_select())
        .load(conn)?;
    Ok(rows.iter().map(PersonSummary::from_person).collect())
}

pub fn find_person(
    conn: &mut PgConnection,
    viewer: &Viewer,
    person_id: Uuid,
) -> QueryResult<Option<PersonDetail>> {
    let Some(person) = load_visible(conn, viewer, person_id)? else {
        return Ok(None);
    };
    detail(conn, &person).map(Some)
}

pub fn detail(conn: &mut PgConnection, person: &Person) -> QueryResult<PersonDetail> {
    let images = attachments::load_for_owner(conn, OwnerKind::Person, person.id)?
        .iter()
        .map(MediaLink::from_attachment)
        .collect();
    Ok(PersonDetail::build(person, images))
}

/// The unmasked row, for write paths that respond with [`PersonDetail`].
pub fn load_visible(
    conn: &mut PgConnection,
    viewer: &Viewer,
    person_id: Uuid,
) -> QueryResult<Option<Person>> {
    visible_persons(viewer)
        .filter(persons::id.eq(person_id))
        .select(Person::as_select())
        .first(conn)
        .optional()
}

pub fn is_visible(conn: &mut PgConnection, viewer: &Viewer, person_id: Uuid) -> QueryResult<bool> {
    Ok(load_visible(conn, viewer, person_id)?.is_some())
}

pub fn visible_person_ids(conn: &mut PgConnection, viewer: &Viewer) -> QueryResult<Vec<Uuid>> {
    visible_persons(viewer).select(persons::id).load(conn)
}

/// Those of `ids` that exist but lie outside the viewer's families.
pub fn hidden_persons(
    conn: &mut PgConnection,
    viewer: &Viewer,
    ids: &[Uuid],
) -> QueryResult<Vec<Uuid>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let visible: HashSet<Uuid> = visible_persons(viewer)
        .filter(persons::id.eq_any(ids.to_vec()))
        .select(persons::id)
        .load::<Uuid>(conn)?
        .into_iter()
        .collect();
    let existing: Vec<Uuid> = persons::table
        .filter(persons::id.eq_any(ids))
        .select(persons::id)
        .load(conn)?;
    Ok(existing
        .into_iter()
        .filter(|id| !visible.contains(id))
        .collect())
}

/// Tiered identities of the given persons, regardless of family scope. A
/// person whose relation a viewer may read may reference relatives from
/// other trees; those still only appear by their tiered name.
pub fn relatives(
    conn: &mut PgConnection,
    person_ids: &[Uuid],
) -> QueryResult<HashMap<Uuid, RelativeRef>> {
    if person_ids.is_empty() {
        return Ok(HashMap::new());
    }
    let rows: Vec<(Uuid, String, String, String)> = persons::table
        .filter(persons::id.eq_any(person_ids))
        .select((persons::id, persons::refn, persons::name, persons::confidential))
        .load(conn)?;
    Ok(rows
        .into_iter()
        .map(|(id, refn, name, confidential)| {
            let tier = Confidentiality::parse(&confidential).unwrap_or(Confidentiality::Yes);
            let refn = if tier == Confidentiality::Yes {
                String::new()
            } else {
                refn
            };
            (
                id,
                RelativeRef {
                    id,
                    refn,
                    name: tiered_name(tier, &name),
                },
            )
        })
        .collect())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MarriageView {
    pub position: i32,
    pub spouse: Option<RelativeRef>,
    pub marriage_date: Option<String>,
    pub marriage_place: Option<String>,
    pub family_status: Option<FamilyStatus>,
    pub children: Vec<RelativeRef>,
}

/// A relation record with every referenced person reduced to its tiered
/// identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelationView {
    pub person_id: Uuid,
    pub father: Option<RelativeRef>,
    pub mother: Option<RelativeRef>,
    pub marriages: Vec<MarriageView>,
}

impl RelationView {
    pub fn build(record: &RelationRecord, relatives: &HashMap<Uuid, RelativeRef>) -> Self {
        let lookup = |id: Option<Uuid>| id.and_then(|id| relatives.get(&id)).cloned();
        Self {
            person_id: record.person_id,
            father: lookup(record.father_id),
            mother: lookup(record.mother_id),
            marriages: record
                .marriages
                .iter()
                .map(|marriage| MarriageView {
                    position: marriage.position,
                    spouse: lookup(marriage.spouse_id),
                    marriage_date: marriage.marriage_date.clone(),
                    marriage_place: marriage.marriage_place.clone(),
                    family_status: marriage.family_status,
                    children: marriage
                        .children
                        .iter()
                        .filter_map(|child| relatives.get(child).cloned())
                        .collect(),
                })
                .collect(),
        }
    }

    /// A person without a stored relation reads as an empty one.
    pub fn empty(person_id: Uuid) -> Self {
        Self {
            person_id,
            father: None,
            mother: None,
            marriages: Vec::new(),
        }
    }
}

/// Stored relations of every person the viewer may see.
pub fn list_relations(conn: &mut PgConnection, viewer: &Viewer) -> QueryResult<Vec<RelationView>> {
    let person_ids: Vec<Uuid> = visible_persons(viewer)
        .order((persons::name.asc(), persons::refn.asc()))
        .select(persons::id)
        .load(conn)?;
    let mut records = relation::load_relations(conn, &person_ids)?;
    let order: HashMap<Uuid, usize> = person_ids
        .iter()
        .enumerate()
        .map(|(index, id)| (*id, index))
        .collect();
    records.sort_by_key(|record| order.get(&record.person_id).copied());

    let ids: Vec<Uuid> = records.iter().flat_map(referenced).collect();
    let relatives = relatives(conn, &ids)?;
    Ok(records
        .iter()
        .map(|record| RelationView::build(record, &relatives))
        .collect())
}

fn referenced(record: &RelationRecord) -> Vec<Uuid> {
    let mut ids: Vec<Uuid> = Vec::new();
    ids.extend(record.father_id);
    ids.extend(record.mother_id);
    for marriage in &record.marriages {
        ids.extend(marriage.spouse_id);
        ids.extend(marriage.children.iter().copied());
    }
    ids
}

/// The relation of a person the viewer may see, or `None` when the person
/// is outside the viewer's families.
pub fn find_relation(
    conn: &mut PgConnection,
    viewer: &Viewer,
    person_id: Uuid,
) -> QueryResult<Option<RelationView>> {
    if !is_visible(conn, viewer, person_id)? {
        return Ok(None);
    }
    let Some(record) = relation::load_relation(conn, person_id)? else {
        return Ok(Some(RelationView::empty(person_id)));
    };
    let relatives = relatives(conn, &referenced(&record))?;
    Ok(Some(RelationView::build(&record, &relatives)))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::{json, Value};

    pub(crate) fn person(confidential: &str) -> Person {
        let now = Utc::now().naive_utc();
        Person {
            id: Uuid::new_v4(),
            refn: "@I7@".into(),
            name: "Johann Kempe".into(),
            uid: Some("UID-7".into()),
            surn: Some("Kempe".into()),
            givn: Some("Johann".into()),
            sex: Some("M".into()),
            occu: Some("Müller".into()),
            chan_date: None,
            chan_date_time: None,
            birt_date: Some("03.10.1921".into()),
            birth_date_formatted: NaiveDate::from_ymd_opt(1921, 10, 3),
            birt_plac: Some("Essen".into()),
            deat_date: None,
            death_date_formatted: None,
            deat_plac: None,
            note: Some("private".into()),
            chr_date: None,
            chr_plac: None,
            chr_addr: None,
            buri_date: None,
            buri_plac: None,
            name_rufname: None,
            name_npfx: None,
            name_nick: None,
            name_marnm: None,
            sour: None,
            reli: None,
            confidential: confidential.into(),
            family_1: Some("kempe".into()),
            family_2: None,
            created_by: None,
            last_modified_by: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub(crate) fn only_blank_except(value: &Value, keep: &[&str]) {
        let object = value.as_object().expect("object");
        for (key, field) in object {
            if keep.contains(&key.as_str()) {
                continue;
            }
            assert_eq!(field, &json!(""), "field {key} should be blank");
        }
    }

    #[test]
    fn fully_confidential_person_shows_only_placeholder() {
        let subject = person("yes");
        let value = serde_json::to_value(PersonDetail::build(&subject, Vec::new())).unwrap();
        assert_eq!(value["id"], json!(subject.id));
        assert_eq!(value["name"], json!(CONFIDENTIAL_NAME));
        assert_eq!(value["confidential"], json!("yes"));
        only_blank_except(&value, &["id", "name", "confidential"]);
    }

    #[test]
    fn restricted_person_keeps_real_name_only() {
        let subject = person("restricted");
        let value = serde_json::to_value(PersonDetail::build(&subject, Vec::new())).unwrap();
        assert_eq!(value["name"], json!("Johann Kempe"));
        assert_eq!(value["surn"], json!(""));
        assert_eq!(value["givn"], json!(""));
        only_blank_except(&value, &["id", "name", "confidential"]);
    }

    #[test]
    fn public_person_shows_every_field() {
        let subject = person("no");
        let value = serde_json::to_value(PersonDetail::build(&subject, Vec::new())).unwrap();
        assert_eq!(value["refn"], json!("@I7@"));
        assert_eq!(value["birth_date_formatted"], json!("1921-10-03"));
        assert_eq!(value["occu"], json!("Müller"));
        assert_eq!(value["deat_date"], Value::Null);
        assert_eq!(value["images"], json!([]));
    }

    #[test]
    fn summaries_follow_the_same_tiers() {
        let hidden = serde_json::to_value(PersonSummary::from_person(&person("yes"))).unwrap();
        assert_eq!(hidden["name"], json!(CONFIDENTIAL_NAME));
        assert_eq!(hidden["surn"], json!(""));
        assert_eq!(hidden["givn"], json!(""));

        let restricted =
            serde_json::to_value(PersonSummary::from_person(&person("restricted"))).unwrap();
        assert_eq!(restricted["name"], json!("Johann Kempe"));
        assert_eq!(restricted["surn"], json!(""));

        let open = serde_json::to_value(PersonSummary::from_person(&person("no"))).unwrap();
        assert_eq!(open["surn"], json!("Kempe"));
        assert_eq!(open["givn"], json!("Johann"));
    }

    #[test]
    fn unknown_tier_is_treated_as_confidential() {
        let summary = PersonSummary::from_person(&person("maybe"));
        assert_eq!(summary.name, CONFIDENTIAL_NAME);
        assert!(summary.surn.is_hidden());
    }

    #[test]
    fn relation_view_resolves_relatives_and_skips_unknown_ids() {
        let father = Uuid::new_v4();
        let spouse = Uuid::new_v4();
        let child = Uuid::new_v4();
        let missing = Uuid::new_v4();
        let record = RelationRecord {
            person_id: Uuid::new_v4(),
            father_id: Some(father),
            mother_id: None,
            marriages: vec![relation::Marriage {
                id: Uuid::new_v4(),
                position: 1,
                spouse_id: Some(spouse),
                marriage_date: Some("01.05.1950".into()),
                marriage_place: None,
                family_status: Some(FamilyStatus::Married),
                children: [child, missing].into_iter().collect(),
            }],
        };
        let relatives: HashMap<Uuid, RelativeRef> = [
            (father, "@I1@", "Karl Kempe"),
            (spouse, "", CONFIDENTIAL_NAME),
            (child, "@I3@", "Otto Kempe"),
        ]
        .into_iter()
        .map(|(id, refn, name)| {
            (
                id,
                RelativeRef {
                    id,
                    refn: refn.into(),
                    name: name.into(),
                },
            )
        })
        .collect();

        let view = RelationView::build(&record, &relatives);
        assert_eq!(view.father.as_ref().map(|r| r.name.as_str()), Some("Karl Kempe"));
        assert!(view.mother.is_none());
        let marriage = &view.marriages[0];
        assert_eq!(
            marriage.spouse.as_ref().map(|r| r.name.as_str()),
            Some(CONFIDENTIAL_NAME)
        );
        assert_eq!(marriage.children.len(), 1);
        assert_eq!(marriage.children[0].refn, "@I3@");
    }
}
