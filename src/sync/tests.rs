//! Synchronization Tests
//!
//! ## Test Scopes
//! - **Merge**: field rules and independence from branch order.
//! - **Parent side**: snapshots report reassigned and deleted elements; pushes for
//!   elements no longer assigned to the child are ignored.
//! - **Replicas**: two stores converge on the same merged revision.

#[cfg(test)]
mod tests {
    use crate::services::SiteCapacity;
    use crate::store::backend::ElementUpdate;
    use crate::store::memory::{ApplyOutcome, DocumentStore};
    use crate::store::types::{Element, ElementId, ElementStatus};
    use crate::sync::conflict::{merge_elements, merge_status};
    use crate::sync::protocol::AcquireRequest;
    use crate::test_support::*;

    fn copy(status: ElementStatus) -> Element {
        let mut element = Element::new("req", "Reco", "mem://req", status);
        element.id = ElementId::from("shared");
        element.insert_time = 1;
        element.update_time = 1;
        element
    }

    // ============================================================
    // MERGE
    // ============================================================

    #[test]
    fn test_cancel_wins_and_progress_is_kept() {
        let mut done = copy(ElementStatus::Done);
        done.percent_complete = 69;
        let canceled = copy(ElementStatus::Canceled);

        let merged = merge_elements(&canceled, &[&done]);

        assert_eq!(merged.status, ElementStatus::Canceled);
        assert_eq!(merged.percent_complete, 69);
    }

    #[test]
    fn test_merge_ignores_branch_order() {
        // ARRANGE
        let mut running = copy(ElementStatus::Running);
        running.percent_complete = 40;
        running.subscription_id = Some(7);
        running.child_queue_url = Some("http://local".into());
        running.update_time = 5;
        let mut reprioritized = copy(ElementStatus::Acquired);
        reprioritized.priority = 50;
        reprioritized.priority_updated = 9;
        let mut finished = copy(ElementStatus::Done);
        finished.percent_complete = 30;
        finished.percent_success = 25;
        finished.update_time = 3;

        // ACT
        let a = merge_elements(&running, &[&reprioritized, &finished]);
        let b = merge_elements(&finished, &[&running, &reprioritized]);
        let c = merge_elements(&reprioritized, &[&finished, &running]);

        // ASSERT
        assert_eq!(a, b);
        assert_eq!(b, c);
        assert_eq!(a.status, ElementStatus::Done);
        assert_eq!(a.priority, 50);
        assert_eq!(a.percent_complete, 40);
        assert_eq!(a.percent_success, 25);
        assert_eq!(a.subscription_id, Some(7));
        assert_eq!(a.update_time, 5);
    }

    #[test]
    fn test_merge_full_tie_ignores_branch_order() {
        // ARRANGE: copies equal on every ordering field but carrying different payloads
        let mut ops = copy(ElementStatus::Running);
        ops.team = Some("ops".into());
        ops.inputs.insert("/data#1".into(), vec!["A".into()]);
        let mut analysis = copy(ElementStatus::Running);
        analysis.team = Some("analysis".into());
        analysis.spec_url = "mem://other".into();

        // ACT
        let a = merge_elements(&ops, &[&analysis]);
        let b = merge_elements(&analysis, &[&ops]);

        // ASSERT
        assert_eq!(a, b);
    }

    #[test]
    fn test_pending_split_beats_parent_acquired() {
        let local = copy(ElementStatus::Negotiating);
        let parent = copy(ElementStatus::Acquired);
        let running = copy(ElementStatus::Running);

        assert_eq!(merge_status(&[&parent, &local]), ElementStatus::Negotiating);
        assert_eq!(merge_status(&[&running, &local]), ElementStatus::Running);
    }

    // ============================================================
    // REPLICAS
    // ============================================================

    #[test]
    fn test_replicas_converge_after_resolve() {
        // ARRANGE: same document, modified independently on both sides
        let parent: DocumentStore<ElementId, Element> = DocumentStore::new("parent");
        let child: DocumentStore<ElementId, Element> = DocumentStore::new("child");
        let id = ElementId::from("shared");
        parent.insert(id.clone(), copy(ElementStatus::Acquired));
        child.apply_replicated(parent.get_document(&id).unwrap(), true);

        parent.update(&id, |e| ElementUpdate::status(ElementStatus::CancelRequested).apply(e));
        child.update(&id, |e| ElementUpdate::progress(69, 69).with_status(ElementStatus::Running).apply(e));

        // ACT
        let outcome = child.apply_replicated(parent.get_document(&id).unwrap(), false);
        child.resolve(&id, merge_elements);
        let back = parent.apply_replicated(child.get_document(&id).unwrap(), false);

        // ASSERT
        assert_eq!(outcome, ApplyOutcome::Conflict);
        assert_eq!(back, ApplyOutcome::FastForward);
        let merged = parent.get(&id).unwrap();
        assert_eq!(merged, child.get(&id).unwrap());
        assert_eq!(merged.status, ElementStatus::CancelRequested);
        assert_eq!(merged.percent_complete, 69);
    }

    // ============================================================
    // PARENT SIDE
    // ============================================================

    #[tokio::test]
    async fn test_snapshot_reports_reassigned_and_deleted() {
        // ARRANGE: both elements assigned to one child
        let grid = Grid::new();
        let global = grid.global_queue();
        let url = grid.register(block_spec("req"));
        global.queue_work(&url, None, None).await.unwrap();
        let capacity: SiteCapacity = [("A".to_string(), 100)].into_iter().collect();
        let ids = global
            .acquire_for_child(AcquireRequest {
                child_url: "http://local".into(),
                capacity,
                teams: Vec::new(),
                requests: None,
            })
            .await;
        assert_eq!(ids.len(), 2);

        // ACT: take one back; also ask about an id the parent never had
        global.reset_work(&[ids[0].clone()]).await.unwrap();
        let mut known = ids.clone();
        known.push(ElementId::from("gone"));
        let snapshot = global.child_snapshot("http://local", &known);

        // ASSERT
        assert_eq!(snapshot.assigned.len(), 1);
        assert_eq!(snapshot.assigned[0].id, ids[1].to_string());
        assert_eq!(snapshot.orphaned, vec![ids[0].clone()]);
        assert_eq!(snapshot.missing, vec![ElementId::from("gone")]);
    }

    #[tokio::test]
    async fn test_push_ignored_unless_still_assigned() {
        let grid = Grid::new();
        let global = grid.global_queue();
        let url = grid.register(block_spec("req"));
        global.queue_work(&url, None, None).await.unwrap();
        let capacity: SiteCapacity = [("A".to_string(), 100)].into_iter().collect();
        let ids = global
            .acquire_for_child(AcquireRequest {
                child_url: "http://local".into(),
                capacity,
                teams: Vec::new(),
                requests: None,
            })
            .await;

        let mut running = global.backend().elements.get_document(&ids[0]).unwrap();
        running.value.status = ElementStatus::Running;
        running.ancestors.push(running.rev.clone());
        running.rev = running.rev.next();

        let from_stranger = global
            .apply_child_updates("http://other", vec![running.clone()])
            .await;
        let from_owner = global.apply_child_updates("http://local", vec![running]).await;

        assert!(from_stranger.is_empty());
        assert_eq!(from_owner.len(), 1);
        assert_eq!(from_owner[0].status, ElementStatus::Running);
        assert_eq!(
            global.backend().get_element(&ids[0]).unwrap().status,
            ElementStatus::Running
        );
    }
}
