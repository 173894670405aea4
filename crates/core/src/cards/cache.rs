use super::model::Card;
use careview_types::Audience;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;
use tracing::debug;

/// Per-session card groups, keyed by audience and hook id.
///
/// A group is replaced wholesale by [`set_cards`](Self::set_cards); the only in-place mutation
/// is [`delete_suggestion`](Self::delete_suggestion).
#[derive(Debug, Default)]
pub struct CardCache {
    groups: RwLock<HashMap<Audience, BTreeMap<String, Vec<Card>>>>,
}

impl CardCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_cards(&self, audience: Audience, hook_id: impl Into<String>, cards: Vec<Card>) {
        let hook_id = hook_id.into();
        debug!("storing {} card(s) for {audience}/{hook_id}", cards.len());
        self.groups
            .write()
            .await
            .entry(audience)
            .or_default()
            .insert(hook_id, cards);
    }

    pub async fn get_cards(&self, audience: Audience, hook_id: &str) -> Option<Vec<Card>> {
        self.groups
            .read()
            .await
            .get(&audience)
            .and_then(|groups| groups.get(hook_id))
            .cloned()
    }

    /// Every group for `audience`, ordered by hook id.
    pub async fn groups(&self, audience: Audience) -> Vec<(String, Vec<Card>)> {
        self.groups
            .read()
            .await
            .get(&audience)
            .map(|groups| {
                groups
                    .iter()
                    .map(|(id, cards)| (id.clone(), cards.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Remove one group. Returns whether it existed.
    pub async fn delete_cards(&self, audience: Audience, hook_id: &str) -> bool {
        self.groups
            .write()
            .await
            .get_mut(&audience)
            .is_some_and(|groups| groups.remove(hook_id).is_some())
    }

    pub async fn delete_all_cards(&self) {
        self.groups.write().await.clear();
    }

    /// Remove every suggestion whose id is `suggestion_id`, in every group of every audience.
    ///
    /// Suggestions without an id are never matched. Returns whether anything was removed.
    pub async fn delete_suggestion(&self, suggestion_id: &str) -> bool {
        let mut groups = self.groups.write().await;
        let mut removed = false;
        for card in groups
            .values_mut()
            .flat_map(|by_hook| by_hook.values_mut())
            .flat_map(|cards| cards.iter_mut())
        {
            removed |= card.remove_suggestion(suggestion_id);
        }
        if removed {
            debug!("removed suggestion {suggestion_id}");
        }
        removed
    }

    pub async fn is_empty(&self) -> bool {
        self.groups.read().await.values().all(BTreeMap::is_empty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cards::{CardDetail, DetailScheme, Indicator};

    fn card(suggestions: &str) -> Card {
        let detail = CardDetail::new(format!("why|{suggestions}|any|[]"), DetailScheme::Pipe);
        Card::new("summary", Indicator::Info, detail)
    }

    fn suggestion_ids(cards: &[Card]) -> Vec<Option<String>> {
        cards
            .iter()
            .flat_map(|c| c.suggestions().expect("decode").to_vec())
            .map(|s| s.id)
            .collect()
    }

    async fn three_groups() -> CardCache {
        let cache = CardCache::new();
        cache
            .set_cards(
                Audience::Patient,
                "bp-goal",
                vec![card(r#"[{"id":"a","type":"add","label":"A"},{"type":"add","label":"no id"}]"#)],
            )
            .await;
        cache
            .set_cards(
                Audience::Patient,
                "bp-monitoring",
                vec![card(r#"[{"id":"b","type":"add","label":"B"}]"#)],
            )
            .await;
        cache
            .set_cards(
                Audience::CareTeam,
                "bp-goal",
                vec![card(r#"[{"id":"c","type":"add","label":"C"}]"#)],
            )
            .await;
        cache
    }

    #[tokio::test]
    async fn deleting_suggestion_touches_only_its_group() {
        let cache = three_groups().await;

        assert!(cache.delete_suggestion("b").await);

        let monitoring = cache
            .get_cards(Audience::Patient, "bp-monitoring")
            .await
            .expect("group kept");
        assert!(suggestion_ids(&monitoring).is_empty());

        let goal = cache
            .get_cards(Audience::Patient, "bp-goal")
            .await
            .expect("group kept");
        assert_eq!(suggestion_ids(&goal), vec![Some("a".to_string()), None]);

        let care_team = cache
            .get_cards(Audience::CareTeam, "bp-goal")
            .await
            .expect("group kept");
        assert_eq!(suggestion_ids(&care_team), vec![Some("c".to_string())]);
    }

    #[tokio::test]
    async fn deleting_unknown_suggestion_changes_nothing() {
        let cache = three_groups().await;
        assert!(!cache.delete_suggestion("zzz").await);
        let goal = cache
            .get_cards(Audience::Patient, "bp-goal")
            .await
            .expect("group kept");
        assert_eq!(suggestion_ids(&goal).len(), 2);
    }

    #[tokio::test]
    async fn deletion_crosses_audiences() {
        let cache = CardCache::new();
        for audience in [Audience::Patient, Audience::CareTeam] {
            cache
                .set_cards(
                    audience,
                    "shared",
                    vec![card(r#"[{"id":"x","type":"add","label":"X"}]"#)],
                )
                .await;
        }
        assert!(cache.delete_suggestion("x").await);
        for audience in [Audience::Patient, Audience::CareTeam] {
            let cards = cache.get_cards(audience, "shared").await.expect("group kept");
            assert!(suggestion_ids(&cards).is_empty());
        }
    }

    #[tokio::test]
    async fn set_replaces_and_delete_removes_groups() {
        let cache = three_groups().await;
        cache
            .set_cards(Audience::Patient, "bp-goal", vec![Card::error("boom", false)])
            .await;
        let goal = cache
            .get_cards(Audience::Patient, "bp-goal")
            .await
            .expect("group kept");
        assert_eq!(goal.len(), 1);
        assert!(goal[0].is_error());

        assert!(cache.delete_cards(Audience::Patient, "bp-goal").await);
        assert!(!cache.delete_cards(Audience::Patient, "bp-goal").await);
        assert!(cache.get_cards(Audience::Patient, "bp-goal").await.is_none());
        assert_eq!(cache.groups(Audience::Patient).await.len(), 1);

        cache.delete_all_cards().await;
        assert!(cache.is_empty().await);
    }
}
