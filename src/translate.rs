// 🔁 Raw entry → Member translation
// The only place that knows the remote schema. Field mapping:
//
//   RawMember.id              → Member.id
//   RawMember.access_hash     → Member.access_hash      (missing → 0)
//   RawMember.username        → Member.username
//   RawMember.first_name      → Member.first_name
//   RawMember.last_name       → Member.last_name
//   RawMember.photo.photo_id  → Member.photo_id         (no photo → None)
//   RawMember.bot/verified/restricted/premium → same-named flags
//   RawMember.status          → Member.status + Member.last_online:
//       Online{..}            → Online,     last_online None
//       Offline{was_online}   → Offline,    last_online Some(was_online)
//       Recently              → Recently
//       LastWeek              → LastWeek
//       LastMonth             → LastMonth
//       Empty / absent        → Unknown
//   collection.id / .handle   → Member.channel_id / .channel_username
//   ingestion clock           → Member.added_at

use chrono::{DateTime, Utc};

use crate::model::{Collection, Member, PresenceStatus};
use crate::remote::{RawMember, RawStatus};

pub fn to_member(raw: &RawMember, collection: &Collection, ingested_at: DateTime<Utc>) -> Member {
    let (status, last_online) = match &raw.status {
        Some(RawStatus::Online { .. }) => (PresenceStatus::Online, None),
        Some(RawStatus::Offline { was_online }) => (PresenceStatus::Offline, Some(*was_online)),
        Some(RawStatus::Recently) => (PresenceStatus::Recently, None),
        Some(RawStatus::LastWeek) => (PresenceStatus::LastWeek, None),
        Some(RawStatus::LastMonth) => (PresenceStatus::LastMonth, None),
        Some(RawStatus::Empty) | None => (PresenceStatus::Unknown, None),
    };

    Member {
        id: raw.id,
        access_hash: raw.access_hash.unwrap_or(0),
        username: raw.username.clone(),
        first_name: raw.first_name.clone(),
        last_name: raw.last_name.clone(),
        photo_id: raw.photo.as_ref().map(|p| p.photo_id),
        bot: raw.bot,
        verified: raw.verified,
        restricted: raw.restricted,
        premium: raw.premium,
        status,
        last_online,
        added_at: ingested_at,
        channel_id: collection.id,
        channel_username: collection.handle.clone(),
    }
}

/// Translate one page, dropping entries at or below the resume cursor.
pub fn translate_page(
    page: &[RawMember],
    collection: &Collection,
    resume_cursor: Option<i64>,
) -> Vec<Member> {
    let now = Utc::now();
    page.iter()
        .filter(|raw| resume_cursor.map_or(true, |cursor| raw.id > cursor))
        .map(|raw| to_member(raw, collection, now))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::RawPhoto;
    use chrono::TimeZone;

    fn collection() -> Collection {
        Collection::new(999, "@test_channel")
    }

    #[test]
    fn test_field_mapping() {
        let seen = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let mut raw = RawMember::new(7)
            .named(Some("Ada"), Some("Lovelace"))
            .with_username("ada")
            .with_status(RawStatus::Offline { was_online: seen });
        raw.photo = Some(RawPhoto { photo_id: 555 });
        raw.premium = true;

        let member = to_member(&raw, &collection(), Utc::now());

        assert_eq!(member.id, 7);
        assert_eq!(member.access_hash, 77);
        assert_eq!(member.username.as_deref(), Some("ada"));
        assert_eq!(member.photo_id, Some(555));
        assert!(member.premium);
        assert_eq!(member.status, PresenceStatus::Offline);
        assert_eq!(member.last_online, Some(seen));
        assert_eq!(member.channel_id, 999);
        assert_eq!(member.channel_username, "@test_channel");
    }

    #[test]
    fn test_status_variants() {
        let cases = [
            (Some(RawStatus::Online { expires: Utc::now() }), PresenceStatus::Online),
            (Some(RawStatus::Recently), PresenceStatus::Recently),
            (Some(RawStatus::LastWeek), PresenceStatus::LastWeek),
            (Some(RawStatus::LastMonth), PresenceStatus::LastMonth),
            (Some(RawStatus::Empty), PresenceStatus::Unknown),
            (None, PresenceStatus::Unknown),
        ];

        for (status, expected) in cases {
            let mut raw = RawMember::new(1);
            raw.status = status;
            let member = to_member(&raw, &collection(), Utc::now());
            assert_eq!(member.status, expected);
            assert_eq!(member.last_online, None);
        }
    }

    #[test]
    fn test_missing_access_hash_defaults_to_zero() {
        let mut raw = RawMember::new(3);
        raw.access_hash = None;
        assert_eq!(to_member(&raw, &collection(), Utc::now()).access_hash, 0);
    }

    #[test]
    fn test_translate_page_skips_resume_cursor() {
        let page: Vec<RawMember> = (1..=6).map(RawMember::new).collect();

        let all = translate_page(&page, &collection(), None);
        assert_eq!(all.len(), 6);

        let tail = translate_page(&page, &collection(), Some(4));
        let ids: Vec<i64> = tail.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![5, 6]);
    }
}
