//! List mutation recipes: the placeholder pattern.
//!
//! Ordered lists that accept optimistic inserts follow the same shape
//! everywhere: prepend a speculative item under a temporary id, later swap
//! it in place for the server row, and for deletes keep enough state to
//! reinsert at the original position when the call fails.

use std::marker::PhantomData;

use tracing::trace;

use tidemark_store::{CacheStore, CachedValue, Entity, Page, Paginated, QueryKey};

/// Position of one item in a flat or paginated list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListIndex {
    /// Page ordinal; always 0 for flat lists.
    pub page: usize,
    /// Item ordinal within the page.
    pub item: usize,
}

/// Mutable access shared by flat and paginated list shapes.
pub trait ItemList<T>: Sized {
    /// A list holding exactly `item`.
    fn singleton(item: T) -> Self;
    /// Insert at the front.
    fn prepend(&mut self, item: T);
    /// Insert at the back.
    fn append(&mut self, item: T);
    /// Position of the first item matching `pred`.
    fn position(&self, pred: &mut dyn FnMut(&T) -> bool) -> Option<ListIndex>;
    /// Mutable access by position.
    fn get_mut(&mut self, index: ListIndex) -> Option<&mut T>;
    /// Remove by position.
    fn remove(&mut self, index: ListIndex) -> Option<T>;
    /// Insert at a position, clamped to the current shape.
    fn insert(&mut self, index: ListIndex, item: T);
}

impl<T> ItemList<T> for Vec<T> {
    fn singleton(item: T) -> Self {
        vec![item]
    }

    fn prepend(&mut self, item: T) {
        self.insert(0, item);
    }

    fn append(&mut self, item: T) {
        self.push(item);
    }

    fn position(&self, pred: &mut dyn FnMut(&T) -> bool) -> Option<ListIndex> {
        self.iter()
            .position(|item| pred(item))
            .map(|item| ListIndex { page: 0, item })
    }

    fn get_mut(&mut self, index: ListIndex) -> Option<&mut T> {
        if index.page != 0 {
            return None;
        }
        <[T]>::get_mut(self, index.item)
    }

    fn remove(&mut self, index: ListIndex) -> Option<T> {
        if index.page != 0 || index.item >= self.len() {
            return None;
        }
        Some(Vec::remove(self, index.item))
    }

    fn insert(&mut self, index: ListIndex, item: T) {
        let at = index.item.min(self.len());
        Vec::insert(self, at, item);
    }
}

impl<T> ItemList<T> for Paginated<T> {
    fn singleton(item: T) -> Self {
        Paginated::single(vec![item])
    }

    fn prepend(&mut self, item: T) {
        match self.pages.first_mut() {
            Some(first) => first.items.insert(0, item),
            None => self.pages.push(Page::new(vec![item], None)),
        }
    }

    fn append(&mut self, item: T) {
        match self.pages.last_mut() {
            Some(last) => last.items.push(item),
            None => self.pages.push(Page::new(vec![item], None)),
        }
    }

    fn position(&self, pred: &mut dyn FnMut(&T) -> bool) -> Option<ListIndex> {
        for (page, contents) in self.pages.iter().enumerate() {
            if let Some(item) = contents.items.iter().position(|item| pred(item)) {
                return Some(ListIndex { page, item });
            }
        }
        None
    }

    fn get_mut(&mut self, index: ListIndex) -> Option<&mut T> {
        self.pages
            .as_mut_slice()
            .get_mut(index.page)?
            .items
            .as_mut_slice()
            .get_mut(index.item)
    }

    fn remove(&mut self, index: ListIndex) -> Option<T> {
        let page = self.pages.as_mut_slice().get_mut(index.page)?;
        if index.item >= page.items.len() {
            return None;
        }
        Some(page.items.remove(index.item))
    }

    fn insert(&mut self, index: ListIndex, item: T) {
        if self.pages.is_empty() {
            self.pages.push(Page::new(vec![item], None));
            return;
        }
        let page = index.page.min(self.pages.len() - 1);
        let target = &mut self.pages[page];
        let at = index.item.min(target.items.len());
        target.items.insert(at, item);
    }
}

/// Prepend a speculative item, creating the list when the query was never
/// populated, so e.g. an empty comment list still renders immediately.
pub fn insert_placeholder<L, T>(store: &CacheStore, key: &QueryKey, item: T)
where
    L: ItemList<T> + CachedValue,
    T: Clone,
{
    let inserted = store.update::<L>(key, |list| list.prepend(item.clone()));
    if !inserted {
        store.populate(key.clone(), L::singleton(item));
    }
    trace!(%key, "list: placeholder inserted");
}

/// Swap a placeholder for the server row, in place, preserving its list
/// position.
///
/// When the temp id is gone (the list was refetched in the interim) the
/// server row is appended instead. Returns true for the in-place swap.
pub fn replace_placeholder<L, T>(
    store: &CacheStore,
    key: &QueryKey,
    temp_id: &str,
    replacement: T,
) -> bool
where
    L: ItemList<T> + CachedValue,
    T: Entity,
{
    let mut in_place = false;
    store.update::<L>(key, |list| {
        match list.position(&mut |item: &T| item.id() == temp_id) {
            Some(index) => {
                if let Some(slot) = list.get_mut(index) {
                    *slot = replacement.clone();
                    in_place = true;
                }
            }
            None => list.append(replacement.clone()),
        }
    });
    trace!(%key, temp_id, in_place, "list: placeholder replaced");
    in_place
}

/// Remove an item by id, returning a restore handle for failed deletes.
pub fn remove_item<L, T>(store: &CacheStore, key: &QueryKey, id: &str) -> Option<ListRemoval<L, T>>
where
    L: ItemList<T> + CachedValue,
    T: Entity,
{
    let mut removed = None;
    store.update::<L>(key, |list| {
        if let Some(index) = list.position(&mut |item: &T| item.id() == id) {
            removed = list.remove(index).map(|item| (index, item));
        }
    });
    let (index, item) = removed?;
    trace!(%key, id, ?index, "list: item removed");
    Some(ListRemoval {
        key: key.clone(),
        index,
        item,
        _list: PhantomData,
    })
}

/// Captured removal of one list item.
///
/// Holds the item and the position it came from so a failed delete can
/// reinsert it where it was, rather than at the end.
pub struct ListRemoval<L, T> {
    key: QueryKey,
    index: ListIndex,
    item: T,
    _list: PhantomData<fn() -> L>,
}

impl<L, T> ListRemoval<L, T>
where
    L: ItemList<T> + CachedValue,
    T: Clone,
{
    /// The removed item.
    pub fn item(&self) -> &T {
        &self.item
    }

    /// Position the item was removed from.
    pub fn index(&self) -> ListIndex {
        self.index
    }

    /// Reinsert the removed item at its original (clamped) position.
    pub fn restore(self, store: &CacheStore) {
        let Self {
            key, index, item, ..
        } = self;
        trace!(%key, ?index, "list: removed item restored");
        store.update::<L>(&key, |list| list.insert(index, item.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{Favorite, FavoriteSubject, Project};
    use chrono::Utc;
    use pretty_assertions::assert_eq;

    fn project(id: &str) -> Project {
        Project {
            id: id.to_string(),
            name: format!("Project {id}"),
            archived: false,
            private: false,
            contributors_count: 1,
            viewer_has_favorited: false,
            unread_for_viewer: false,
            last_activity_at: Utc::now(),
        }
    }

    fn favorite(id: &str) -> Favorite {
        Favorite {
            id: id.to_string(),
            subject: FavoriteSubject::Project(project("p1")),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn placeholder_insert_creates_missing_list() {
        let store = CacheStore::new();
        let key = QueryKey::of(["favorites", "org"]);
        insert_placeholder::<Vec<Favorite>, _>(&store, &key, favorite("temp-1"));

        let list: Vec<Favorite> = store.get(&key).unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].id, "temp-1");
    }

    #[test]
    fn placeholder_replacement_preserves_position() {
        let store = CacheStore::new();
        let key = QueryKey::of(["favorites", "org"]);
        store.populate(key.clone(), vec![favorite("fav-1"), favorite("fav-2")]);
        insert_placeholder::<Vec<Favorite>, _>(&store, &key, favorite("temp-1"));

        assert!(replace_placeholder::<Vec<Favorite>, _>(
            &store,
            &key,
            "temp-1",
            favorite("fav-9")
        ));

        let ids: Vec<String> = store
            .get::<Vec<Favorite>>(&key)
            .unwrap()
            .into_iter()
            .map(|f| f.id)
            .collect();
        assert_eq!(ids, vec!["fav-9", "fav-1", "fav-2"]);
    }

    #[test]
    fn replacement_falls_back_to_append() {
        let store = CacheStore::new();
        let key = QueryKey::of(["favorites", "org"]);
        store.populate(key.clone(), vec![favorite("fav-1")]);

        assert!(!replace_placeholder::<Vec<Favorite>, _>(
            &store,
            &key,
            "temp-gone",
            favorite("fav-9")
        ));

        let ids: Vec<String> = store
            .get::<Vec<Favorite>>(&key)
            .unwrap()
            .into_iter()
            .map(|f| f.id)
            .collect();
        assert_eq!(ids, vec!["fav-1", "fav-9"]);
    }

    #[test]
    fn removal_restores_at_original_index() {
        let store = CacheStore::new();
        let key = QueryKey::of(["favorites", "org"]);
        store.populate(
            key.clone(),
            vec![favorite("fav-1"), favorite("fav-2"), favorite("fav-3")],
        );

        let removal =
            remove_item::<Vec<Favorite>, Favorite>(&store, &key, "fav-2").expect("item exists");
        assert_eq!(removal.index(), ListIndex { page: 0, item: 1 });
        assert_eq!(store.get::<Vec<Favorite>>(&key).unwrap().len(), 2);

        removal.restore(&store);
        let ids: Vec<String> = store
            .get::<Vec<Favorite>>(&key)
            .unwrap()
            .into_iter()
            .map(|f| f.id)
            .collect();
        assert_eq!(ids, vec!["fav-1", "fav-2", "fav-3"]);
    }

    #[test]
    fn paginated_placeholder_round_trip() {
        let store = CacheStore::new();
        let key = QueryKey::of(["comments", "post-1"]);
        store.populate(
            key.clone(),
            Paginated {
                pages: vec![
                    Page::new(vec![favorite("fav-1")], Some("cursor-1".into())),
                    Page::new(vec![favorite("fav-2")], None),
                ],
            },
        );

        insert_placeholder::<Paginated<Favorite>, _>(&store, &key, favorite("temp-1"));
        let paginated: Paginated<Favorite> = store.get(&key).unwrap();
        assert_eq!(paginated.pages[0].items[0].id, "temp-1");

        assert!(replace_placeholder::<Paginated<Favorite>, _>(
            &store,
            &key,
            "temp-1",
            favorite("fav-9")
        ));
        let paginated: Paginated<Favorite> = store.get(&key).unwrap();
        assert_eq!(paginated.pages[0].items[0].id, "fav-9");
        // cursors survive item rewrites
        assert_eq!(paginated.pages[0].next_cursor, Some("cursor-1".into()));

        let removal =
            remove_item::<Paginated<Favorite>, Favorite>(&store, &key, "fav-2").expect("exists");
        assert_eq!(removal.index(), ListIndex { page: 1, item: 0 });
        removal.restore(&store);
        let paginated: Paginated<Favorite> = store.get(&key).unwrap();
        assert_eq!(paginated.pages[1].items[0].id, "fav-2");
    }
}
