//! Element Store Tests
//!
//! ## Test Scopes
//! - **DocumentStore**: revision bookkeeping, replication outcomes, conflict branches and merges.
//! - **QueueBackend**: field-level updates, monotonic progress, filtering.

#[cfg(test)]
mod tests {
    use crate::store::backend::{ElementFilter, ElementUpdate, QueueBackend};
    use crate::store::memory::{ApplyOutcome, DocumentStore};
    use crate::store::types::*;

    fn element(request: &str, status: ElementStatus) -> Element {
        Element::new(request, "Task", "file:///spec.json", status)
    }

    fn store() -> DocumentStore<ElementId, Element> {
        DocumentStore::new("test")
    }

    // ============================================================
    // DOCUMENT STORE TESTS
    // ============================================================

    #[test]
    fn test_update_creates_descending_revision() {
        // ARRANGE
        let store = store();
        let e = element("req", ElementStatus::Available);
        let id = e.id.clone();
        let first = store.insert(id.clone(), e);

        // ACT
        let second = store
            .update(&id, |e| e.status = ElementStatus::Acquired)
            .unwrap();

        // ASSERT
        let doc = store.get_document(&id).unwrap();
        assert_eq!(doc.rev, second);
        assert_eq!(second.generation, first.generation + 1);
        assert!(doc.descends_from(&first));
        assert_eq!(doc.value.status, ElementStatus::Acquired);
    }

    #[test]
    fn test_update_missing_key_returns_none() {
        let store = store();
        assert!(store.update(&ElementId::from("nope"), |_| {}).is_none());
    }

    #[test]
    fn test_replication_fast_forward_and_idempotence() {
        // ARRANGE: two replicas sharing a first revision
        let parent = store();
        let child = store();
        let e = element("req", ElementStatus::Available);
        let id = e.id.clone();
        parent.insert(id.clone(), e);

        // ACT + ASSERT: first copy is an insert
        let doc = parent.get_document(&id).unwrap();
        assert_eq!(child.apply_replicated(doc.clone(), true), ApplyOutcome::Inserted);
        assert_eq!(child.apply_replicated(doc.clone(), true), ApplyOutcome::Unchanged);

        // ACT + ASSERT: a newer revision fast-forwards
        parent.update(&id, |e| e.status = ElementStatus::Acquired);
        let newer = parent.get_document(&id).unwrap();
        assert_eq!(child.apply_replicated(newer.clone(), true), ApplyOutcome::FastForward);
        assert_eq!(child.get(&id).unwrap().status, ElementStatus::Acquired);

        // ACT + ASSERT: replaying the older revision does nothing
        assert_eq!(child.apply_replicated(doc, true), ApplyOutcome::Unchanged);
        assert_eq!(child.get_document(&id).unwrap().rev, newer.rev);
    }

    #[test]
    fn test_replication_skips_missing_without_insert() {
        let source = store();
        let target = store();
        let e = element("req", ElementStatus::Available);
        let id = e.id.clone();
        source.insert(id.clone(), e);

        let outcome = target.apply_replicated(source.get_document(&id).unwrap(), false);

        assert_eq!(outcome, ApplyOutcome::Skipped);
        assert!(target.is_empty());
    }

    #[test]
    fn test_divergent_updates_keep_same_winner_on_both_replicas() {
        // ARRANGE: shared base, then independent updates on each side
        let a = store();
        let b = store();
        let e = element("req", ElementStatus::Running);
        let id = e.id.clone();
        a.insert(id.clone(), e);
        b.apply_replicated(a.get_document(&id).unwrap(), true);

        a.update(&id, |e| e.percent_complete = 40);
        b.update(&id, |e| e.status = ElementStatus::CancelRequested);
        let doc_a = a.get_document(&id).unwrap();
        let doc_b = b.get_document(&id).unwrap();

        // ACT: exchange in both directions
        assert_eq!(a.apply_replicated(doc_b.clone(), true), ApplyOutcome::Conflict);
        assert_eq!(b.apply_replicated(doc_a.clone(), true), ApplyOutcome::Conflict);

        // ASSERT: both sides elect the same current revision and keep the other branch
        let winner = std::cmp::max(doc_a.rev.clone(), doc_b.rev.clone());
        let after_a = a.get_document(&id).unwrap();
        let after_b = b.get_document(&id).unwrap();
        assert_eq!(after_a.rev, winner);
        assert_eq!(after_b.rev, winner);
        assert_eq!(after_a.conflicts.len(), 1);
        assert_eq!(after_b.conflicts.len(), 1);
        assert_eq!(a.conflicted_keys(), vec![id.clone()]);

        // ACT: replaying the same divergent copy is a no-op
        assert_eq!(a.apply_replicated(doc_b, true), ApplyOutcome::Unchanged);
        assert_eq!(a.get_document(&id).unwrap().conflicts.len(), 1);
    }

    #[test]
    fn test_resolved_revision_fast_forwards_other_replica() {
        // ARRANGE: conflicted on both sides
        let a = store();
        let b = store();
        let e = element("req", ElementStatus::Running);
        let id = e.id.clone();
        a.insert(id.clone(), e);
        b.apply_replicated(a.get_document(&id).unwrap(), true);
        a.update(&id, |e| e.percent_complete = 40);
        b.update(&id, |e| e.percent_complete = 70);
        let doc_a = a.get_document(&id).unwrap();
        let doc_b = b.get_document(&id).unwrap();
        a.apply_replicated(doc_b, true);
        b.apply_replicated(doc_a, true);

        // ACT: merge on one side only
        let merged_rev = a
            .resolve(&id, |current, others| {
                let mut merged = current.clone();
                for other in others {
                    merged.percent_complete = merged.percent_complete.max(other.percent_complete);
                }
                merged
            })
            .unwrap();
        let merged = a.get_document(&id).unwrap();

        // ASSERT
        assert!(!merged.has_conflicts());
        assert_eq!(merged.rev, merged_rev);
        assert_eq!(merged.value.percent_complete, 70);
        assert_eq!(b.apply_replicated(merged, true), ApplyOutcome::FastForward);
        assert!(!b.get_document(&id).unwrap().has_conflicts());
        assert!(a.resolve(&id, |current, _| current.clone()).is_none());
    }

    // ============================================================
    // BACKEND TESTS
    // ============================================================

    #[test]
    fn test_progress_updates_never_decrease() {
        // ARRANGE
        let backend = QueueBackend::new();
        let ids = backend.insert_elements(vec![element("req", ElementStatus::Running)]);

        // ACT
        backend.update_elements(&ids, &ElementUpdate::progress(60, 50));
        let changed = backend.update_elements(&ids, &ElementUpdate::progress(30, 20));

        // ASSERT
        assert!(changed.is_empty(), "Lower progress must not count as a change");
        let stored = backend.get_element(&ids[0]).unwrap();
        assert_eq!(stored.percent_complete, 60);
        assert_eq!(stored.percent_success, 50);
    }

    #[test]
    fn test_field_updates_do_not_clobber_each_other() {
        let backend = QueueBackend::new();
        let ids = backend.insert_elements(vec![element("req", ElementStatus::Acquired)]);

        backend.update_elements(&ids, &ElementUpdate::status(ElementStatus::Running));
        backend.update_elements(&ids, &ElementUpdate::progress(10, 10));
        backend.update_elements(&ids, &ElementUpdate::priority(7));

        let stored = backend.get_element(&ids[0]).unwrap();
        assert_eq!(stored.status, ElementStatus::Running);
        assert_eq!(stored.percent_complete, 10);
        assert_eq!(stored.priority, 7);
        assert!(stored.priority_updated > 0);
    }

    #[test]
    fn test_update_reports_only_changed_ids() {
        let backend = QueueBackend::new();
        let ids = backend.insert_elements(vec![
            element("req", ElementStatus::Available),
            element("req", ElementStatus::Acquired),
        ]);
        let before = backend.elements.get_document(&ids[1]).unwrap().rev;

        let changed = backend.update_elements(&ids, &ElementUpdate::status(ElementStatus::Acquired));

        assert_eq!(changed, vec![ids[0].clone()]);
        assert_eq!(backend.elements.get_document(&ids[1]).unwrap().rev, before);
    }

    #[test]
    fn test_query_filters_combine() {
        // ARRANGE
        let backend = QueueBackend::new();
        let mut delegated = element("alpha", ElementStatus::Acquired);
        delegated.child_queue_url = Some("http://child".to_string());
        backend.insert_elements(vec![
            element("alpha", ElementStatus::Available),
            delegated,
            element("beta", ElementStatus::Available),
        ]);

        // ACT
        let available = backend.query_elements(&ElementFilter::status(&[ElementStatus::Available]));
        let alpha_available = backend.query_elements(
            &ElementFilter::request("alpha").with_status(&[ElementStatus::Available]),
        );
        let at_child = backend.query_elements(&ElementFilter::default().with_child_queue("http://child"));

        // ASSERT
        assert_eq!(available.len(), 2);
        assert_eq!(alpha_available.len(), 1);
        assert_eq!(at_child.len(), 1);
        assert_eq!(at_child[0].status, ElementStatus::Acquired);
    }

    #[test]
    fn test_delete_removes_only_listed() {
        let backend = QueueBackend::new();
        let ids = backend.insert_elements(vec![
            element("req", ElementStatus::Done),
            element("req", ElementStatus::Running),
        ]);

        let deleted = backend.delete_elements(&[ids[0].clone(), ElementId::from("ghost")]);

        assert_eq!(deleted, 1);
        assert!(backend.get_element(&ids[0]).is_none());
        assert!(backend.get_element(&ids[1]).is_some());
    }

    #[test]
    fn test_element_wire_layout_keeps_state_names() {
        let mut e = element("req", ElementStatus::CancelRequested);
        e.child_queue_url = Some("http://child".to_string());

        let json = serde_json::to_value(&e).unwrap();

        assert_eq!(json["Status"], "CancelRequested");
        assert_eq!(json["RequestName"], "req");
        assert_eq!(json["ChildQueueUrl"], "http://child");
        assert!(json.get("ParentQueueId").is_some());
        assert!(json.get("NoLocationUpdate").is_some());
        assert_eq!("CancelRequested".parse::<ElementStatus>(), Ok(ElementStatus::CancelRequested));
    }

    #[test]
    fn test_input_locations_intersect_every_input() {
        let mut e = element("req", ElementStatus::Available);
        assert!(e.input_locations().is_none());

        e.inputs.insert("/a#1".into(), vec!["A".into(), "B".into()]);
        e.inputs.insert("/a#2".into(), vec!["B".into(), "C".into()]);

        let sites = e.input_locations().unwrap();
        assert_eq!(sites.into_iter().collect::<Vec<_>>(), vec!["B".to_string()]);
        assert!(e.parent_locations().is_none());
    }

    #[test]
    fn test_document_without_conflicts_field_decodes() {
        let store = store();
        let id = ElementId::from("doc");
        store.insert(id.clone(), element("req", ElementStatus::Acquired));
        let mut json = serde_json::to_value(store.get_document(&id).unwrap()).unwrap();
        json.as_object_mut().unwrap().remove("conflicts");

        let doc: Document<Element> = serde_json::from_value(json).unwrap();

        assert!(!doc.has_conflicts());
        assert_eq!(doc.value.status, ElementStatus::Acquired);
    }

    #[test]
    fn test_revision_display_handles_multibyte_tags() {
        let rev = Revision {
            generation: 3,
            tag: "ééééééééé".to_string(),
        };

        assert_eq!(rev.to_string(), "3-éééééééé");
    }
}
