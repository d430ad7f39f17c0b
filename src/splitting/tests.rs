//! Splitting Policy Tests
//!
//! ## Test Scopes
//! - **Policy selection**: algorithm names, parent processing.
//! - **Request level**: per-block, per-dataset, production and resubmission output.
//! - **Unit level**: identity copies and dataset-to-block expansion.
//! - **No work**: empty results are reported distinctly from errors.

#[cfg(test)]
mod tests {
    use crate::services::{FailedFile, InMemoryFailureRecords};
    use crate::spec::types::{InputSpec, TaskSpec};
    use crate::splitting::{SplitContext, SplitError, SplitLevel, SplitPolicy, split};
    use crate::store::types::{Element, ElementStatus};
    use crate::test_support::*;

    fn inbox_for(name: &str) -> Element {
        let mut inbox = Element::new(name, "", &spec_url(name), ElementStatus::Negotiating);
        inbox.priority = 10;
        inbox.team = Some("ops".to_string());
        inbox
    }

    // ============================================================
    // POLICY SELECTION
    // ============================================================

    #[test]
    fn test_policy_selected_by_algorithm_name() {
        let cases = [
            ("MonteCarlo", false, SplitPolicy::WholeRequest),
            ("Dataset", false, SplitPolicy::Dataset),
            ("DatasetBlock", false, SplitPolicy::Block),
            ("Block", true, SplitPolicy::DatasetWithParents),
            ("Dataset", true, SplitPolicy::DatasetWithParents),
            ("ResubmitBlock", false, SplitPolicy::Resubmission),
        ];
        for (name, parents, expected) in cases {
            let mut task = TaskSpec::new("T", name);
            task.include_parents = parents;
            assert_eq!(SplitPolicy::for_task(&task), Ok(expected), "algorithm {}", name);
        }

        let unknown = SplitPolicy::for_task(&TaskSpec::new("T", "RoundRobin"));
        assert!(unknown.unwrap_err().contains("RoundRobin"));
    }

    // ============================================================
    // REQUEST LEVEL
    // ============================================================

    #[tokio::test]
    async fn test_block_split_one_element_per_block() {
        // ARRANGE
        let locator = catalog();
        let failures = InMemoryFailureRecords::new();
        let ctx = SplitContext {
            locator: locator.as_ref(),
            failures: &failures,
            default_files_per_job: 1,
            default_events_per_job: 1000,
        };
        let spec = block_spec("req");
        let inbox = inbox_for("req");

        // ACT
        let mut elements = split(&spec, &inbox, SplitLevel::Request, &ctx).await.unwrap();
        elements.sort_by_key(|e| e.jobs);

        // ASSERT
        assert_eq!(elements.len(), 2);
        assert_eq!(elements[0].jobs, 5);
        assert_eq!(elements[1].jobs, 10);
        assert!(elements[0].inputs.contains_key(BLOCK_1));
        assert!(elements[1].inputs.contains_key(BLOCK_2));
        for element in &elements {
            assert_eq!(element.status, ElementStatus::Available);
            assert_eq!(element.parent_queue_id.as_ref(), Some(&inbox.id));
            assert_eq!(element.team.as_deref(), Some("ops"));
            assert_eq!(element.priority, 10);
            assert_eq!(element.site_blacklist, vec!["B".to_string()]);
            assert!(!element.parent_flag);
        }
    }

    #[tokio::test]
    async fn test_dataset_split_sums_blocks() {
        let locator = catalog();
        let failures = InMemoryFailureRecords::new();
        let ctx = SplitContext {
            locator: locator.as_ref(),
            failures: &failures,
            default_files_per_job: 1,
            default_events_per_job: 1000,
        };

        let elements = split(&dataset_spec("req"), &inbox_for("req"), SplitLevel::Request, &ctx)
            .await
            .unwrap();

        assert_eq!(elements.len(), 1);
        assert_eq!(elements[0].jobs, 15);
        assert_eq!(elements[0].num_of_files_added, 15);
        assert_eq!(elements[0].inputs.get(DATASET), Some(&vec!["A".to_string()]));
    }

    #[tokio::test]
    async fn test_dataset_unit_expands_to_blocks() {
        // ARRANGE: a request-level dataset unit as a child would receive it
        let locator = catalog();
        let failures = InMemoryFailureRecords::new();
        let ctx = SplitContext {
            locator: locator.as_ref(),
            failures: &failures,
            default_files_per_job: 1,
            default_events_per_job: 1000,
        };
        let spec = dataset_spec("req");
        let unit = split(&spec, &inbox_for("req"), SplitLevel::Request, &ctx)
            .await
            .unwrap()
            .remove(0);

        // ACT
        let blocks = split(&spec, &unit, SplitLevel::Unit, &ctx).await.unwrap();

        // ASSERT
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks.iter().map(|e| e.jobs).sum::<u64>(), unit.jobs);
        assert!(blocks.iter().all(|e| e.parent_queue_id.as_ref() == Some(&unit.id)));
    }

    #[tokio::test]
    async fn test_block_unit_is_identity_copy() {
        let locator = catalog();
        let failures = InMemoryFailureRecords::new();
        let ctx = SplitContext {
            locator: locator.as_ref(),
            failures: &failures,
            default_files_per_job: 1,
            default_events_per_job: 1000,
        };
        let spec = block_spec("req");
        let unit = split(&spec, &inbox_for("req"), SplitLevel::Request, &ctx)
            .await
            .unwrap()
            .remove(0);

        let copies = split(&spec, &unit, SplitLevel::Unit, &ctx).await.unwrap();

        assert_eq!(copies.len(), 1);
        assert_ne!(copies[0].id, unit.id);
        assert_eq!(copies[0].inputs, unit.inputs);
        assert_eq!(copies[0].jobs, unit.jobs);
        assert_eq!(copies[0].parent_queue_id.as_ref(), Some(&unit.id));
    }

    #[tokio::test]
    async fn test_parent_processing_carries_parent_data() {
        let locator = catalog();
        let failures = InMemoryFailureRecords::new();
        let ctx = SplitContext {
            locator: locator.as_ref(),
            failures: &failures,
            default_files_per_job: 1,
            default_events_per_job: 1000,
        };
        let mut spec = block_spec("req");
        spec.tasks[0].include_parents = true;

        let mut elements = split(&spec, &inbox_for("req"), SplitLevel::Request, &ctx)
            .await
            .unwrap();
        elements.sort_by_key(|e| e.jobs);

        assert_eq!(elements.len(), 2);
        assert!(elements.iter().all(|e| e.parent_flag));
        // 5 own files + 3 parent files
        assert_eq!(elements[0].num_of_files_added, 8);
        assert_eq!(elements[0].jobs, 5);
        assert_eq!(
            elements[1].parent_data.get("/MinBias/Run2024-v1/GEN-SIM#p2"),
            Some(&vec!["A".to_string(), "C".to_string()])
        );
    }

    #[tokio::test]
    async fn test_production_jobs_from_event_count() {
        let locator = catalog();
        let failures = InMemoryFailureRecords::new();
        let ctx = SplitContext {
            locator: locator.as_ref(),
            failures: &failures,
            default_files_per_job: 1,
            default_events_per_job: 1000,
        };

        let elements = split(&production_spec("mc", 1050), &inbox_for("mc"), SplitLevel::Request, &ctx)
            .await
            .unwrap();

        assert_eq!(elements.len(), 1);
        assert_eq!(elements[0].jobs, 11);
        assert_eq!(elements[0].mask.unwrap().last_event, 1050);
        assert!(elements[0].inputs.is_empty());
    }

    #[tokio::test]
    async fn test_resubmission_groups_by_location() {
        // ARRANGE: three failed files at two distinct location sets
        let locator = catalog();
        let failures = InMemoryFailureRecords::new();
        let file = |lfn: &str, sites: &[&str]| FailedFile {
            lfn: lfn.to_string(),
            events: 100,
            locations: sites.iter().map(|s| s.to_string()).collect(),
            parents: vec![format!("{}.parent", lfn)],
        };
        failures.record("acdc", "/req/Reco", file("/store/1.root", &["A"]));
        failures.record("acdc", "/req/Reco", file("/store/2.root", &["A"]));
        failures.record("acdc", "/req/Reco", file("/store/3.root", &["C", "A"]));
        let ctx = SplitContext {
            locator: locator.as_ref(),
            failures: &failures,
            default_files_per_job: 1,
            default_events_per_job: 1000,
        };
        let mut spec = block_spec("req");
        spec.tasks[0].split_algorithm = "ResubmitBlock".to_string();
        spec.tasks[0].include_parents = true;
        spec.tasks[0].input = Some(InputSpec::Resubmission {
            collection: "acdc".to_string(),
            task_path: "/req/Reco".to_string(),
        });

        // ACT
        let mut elements = split(&spec, &inbox_for("req"), SplitLevel::Request, &ctx)
            .await
            .unwrap();
        elements.sort_by_key(|e| e.jobs);

        // ASSERT
        assert_eq!(elements.len(), 2);
        assert_eq!(elements[0].jobs, 1);
        assert_eq!(elements[1].jobs, 2);
        assert_eq!(elements[1].num_of_files_added, 4);
        let sites: Vec<&Vec<String>> = elements[0].inputs.values().collect();
        assert_eq!(sites, vec![&vec!["A".to_string(), "C".to_string()]]);
    }

    // ============================================================
    // NO WORK
    // ============================================================

    #[tokio::test]
    async fn test_empty_results_are_no_work() {
        let locator = catalog();
        let failures = InMemoryFailureRecords::new();
        let ctx = SplitContext {
            locator: locator.as_ref(),
            failures: &failures,
            default_files_per_job: 1,
            default_events_per_job: 1000,
        };

        let zero_events = split(&production_spec("mc", 0), &inbox_for("mc"), SplitLevel::Request, &ctx).await;
        assert!(matches!(zero_events, Err(SplitError::NoWork)));

        for algorithm in ["Block", "Dataset"] {
            let mut spec = block_spec("req");
            spec.tasks[0].split_algorithm = algorithm.to_string();
            spec.tasks[0].run_whitelist = vec![666];
            let result = split(&spec, &inbox_for("req"), SplitLevel::Request, &ctx).await;
            assert!(matches!(result, Err(SplitError::NoWork)), "{} with bad runs", algorithm);
        }

        let mut resubmit = block_spec("req");
        resubmit.tasks[0].split_algorithm = "ResubmitBlock".to_string();
        resubmit.tasks[0].input = Some(InputSpec::Resubmission {
            collection: "empty".to_string(),
            task_path: "/req/Reco".to_string(),
        });
        let result = split(&resubmit, &inbox_for("req"), SplitLevel::Request, &ctx).await;
        assert!(matches!(result, Err(SplitError::NoWork)));
    }

    #[tokio::test]
    async fn test_run_whitelist_keeps_matching_blocks() {
        let locator = catalog();
        let failures = InMemoryFailureRecords::new();
        let ctx = SplitContext {
            locator: locator.as_ref(),
            failures: &failures,
            default_files_per_job: 1,
            default_events_per_job: 1000,
        };
        let mut spec = block_spec("req");
        spec.tasks[0].run_whitelist = vec![2];

        let elements = split(&spec, &inbox_for("req"), SplitLevel::Request, &ctx).await.unwrap();

        assert_eq!(elements.len(), 1);
        assert!(elements[0].inputs.contains_key(BLOCK_2));
    }

    #[tokio::test]
    async fn test_unknown_dataset_is_lookup_error() {
        let locator = catalog();
        let failures = InMemoryFailureRecords::new();
        let ctx = SplitContext {
            locator: locator.as_ref(),
            failures: &failures,
            default_files_per_job: 1,
            default_events_per_job: 1000,
        };
        let mut spec = block_spec("req");
        spec.tasks[0].input = Some(InputSpec::dataset("Nope", "Run", "RAW", DBS_URL));

        let result = split(&spec, &inbox_for("req"), SplitLevel::Request, &ctx).await;

        assert!(matches!(result, Err(SplitError::Lookup(_))));
    }
}
