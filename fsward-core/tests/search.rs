use serde_json::json;
use tokio_util::sync::CancellationToken;


use fixture::without_timestamp;

#[test]
fn test_duplicates_flag_earliest_copy_as_original() {
    fixture::run(|fixture| async move {
        let body = "x".repeat(2000);
        fixture.write("a/copy.bin", &body);
        fixture.write("b/first.bin", &body);
        fixture.write("c/latest.bin", &body);
        fixture.write("d/other.bin", "y".repeat(2000));
        fixture.write("e/tiny.txt", "small");
        fixture.write("e/tiny_too.txt", "small");

        fixture.set_modified("a/copy.bin", 1_700_000_200);
        fixture.set_modified("b/first.bin", 1_700_000_100);
        fixture.set_modified("c/latest.bin", 1_700_000_300);

        let out = fixture.call("find_duplicates", json!({})).await;
        assert_eq!(out["success"], json!(true), "{out}");
        assert_eq!(out["total_groups"], json!(1));
        assert_eq!(out["total_duplicates"], json!(2));
        assert_eq!(out["wasted_space"], json!(4000));

        let group = &out["duplicate_groups"][0];
        assert_eq!(group["count"], json!(3));
        assert_eq!(group["total_wasted"], json!(4000));
        let paths: Vec<_> = group["files"]
            .as_array()
            .unwrap()
            .iter()
            .map(|f| f["path"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(paths, ["b/first.bin", "a/copy.bin", "c/latest.bin"]);
        assert_eq!(group["files"][0]["original"], json!(true));
        assert_eq!(group["files"][1]["original"], json!(false));
    });
}

#[test]
fn test_duplicates_below_min_size_are_ignored() {
    fixture::run(|fixture| async move {
        fixture.write("one.txt", "same");
        fixture.write("two.txt", "same");

        let out = fixture.call("find_duplicates", json!({})).await;
        assert_eq!(out["total_groups"], json!(0));

        let out = fixture
            .call("find_duplicates", json!({ "min_size": 1 }))
            .await;
        assert_eq!(out["total_groups"], json!(1));
    });
}

#[test]
fn test_content_search_reports_surrounding_lines() {
    fixture::run(|fixture| async move {
        let text: Vec<String> = (1..=20)
            .map(|n| {
                if n == 10 {
                    "the needle is here".to_string()
                } else {
                    format!("line {n}")
                }
            })
            .collect();
        fixture.write("src/haystack.txt", text.join("\n"));

        let out = fixture
            .call("search_content", json!({ "query": "needle" }))
            .await;
        assert_eq!(out["success"], json!(true), "{out}");
        assert_eq!(out["files_with_matches"], json!(1));

        let hit = &out["results"][0];
        assert_eq!(hit["file"], json!("src/haystack.txt"));
        let line = &hit["matches"][0];
        assert_eq!(line["line"], json!(10));
        assert_eq!(line["column"], json!(5));
        assert_eq!(line["before"], json!(["line 8", "line 9"]));
        assert_eq!(line["after"], json!(["line 11", "line 12"]));
    });
}

#[test]
fn test_file_search_ranks_exact_name_first() {
    fixture::run(|fixture| async move {
        fixture.write("docs/config_notes.md", "");
        fixture.write("config", "");
        fixture.write("src/config.rs", "");

        let out = fixture
            .call("search_files", json!({ "pattern": "config" }))
            .await;
        assert_eq!(out["success"], json!(true), "{out}");
        assert_eq!(out["total_found"], json!(3));
        assert_eq!(out["results"][0]["path"], json!("config"));
        assert_eq!(out["results"][0]["match_type"], json!("exact"));
    });
}

#[test]
fn test_protected_paths_are_never_listed() {
    fixture::run(|fixture| async move {
        fixture.write(".env", "TOKEN=abc");
        fixture.write("build/output.txt", "TOKEN=abc");
        fixture.write("notes.txt", "TOKEN=abc");

        let out = fixture
            .call(
                "search_files",
                json!({ "pattern": "*", "include_hidden": true }),
            )
            .await;
        let paths: Vec<_> = out["results"]
            .as_array()
            .unwrap()
            .iter()
            .map(|f| f["path"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(paths, ["notes.txt"]);

        let out = fixture
            .call("search_content", json!({ "query": "TOKEN" }))
            .await;
        assert_eq!(out["files_with_matches"], json!(1));
        assert_eq!(out["results"][0]["file"], json!("notes.txt"));
    });
}

#[test]
fn test_repeated_search_is_served_from_cache() {
    fixture::run(|fixture| async move {
        fixture.write("alpha.txt", "");

        let first = fixture
            .call(
                "search_files",
                json!({ "pattern": "alpha", "case_sensitive": false, "recursive": true }),
            )
            .await;
        fixture.write("sub/alpha_two.txt", "");

        // Same request with its keys in a different order.
        let second = fixture
            .call(
                "search_files",
                json!({ "recursive": true, "case_sensitive": false, "pattern": "alpha" }),
            )
            .await;

        assert_eq!(first["total_found"], json!(1));
        assert_eq!(without_timestamp(first), without_timestamp(second));
    });
}

#[test]
fn test_expired_cache_entry_is_recomputed() {
    fixture::run_with_settings(
        |settings| settings.search.cache_ttl_ms = 50,
        |fixture| async move {
            fixture.write("alpha.txt", "");
            let first = fixture
                .call("search_files", json!({ "pattern": "alpha" }))
                .await;
            assert_eq!(first["total_found"], json!(1));

            fixture.write("sub/alpha_two.txt", "");
            tokio::time::sleep(std::time::Duration::from_millis(120)).await;

            let second = fixture
                .call("search_files", json!({ "pattern": "alpha" }))
                .await;
            assert_eq!(second["total_found"], json!(2));
        },
    );
}

#[test]
fn test_cancelled_search_is_not_cached() {
    fixture::run(|fixture| async move {
        fixture.write("alpha.txt", "");

        let cancelled = CancellationToken::new();
        cancelled.cancel();
        let out = fixture
            .toolbox
            .call_raw(
                "search_files",
                json!({ "agent": "tester", "pattern": "alpha" }),
                &cancelled,
            )
            .await;
        assert_eq!(out["success"], json!(false));
        assert_eq!(out["error_kind"], json!("cancelled"));

        let out = fixture
            .call("search_files", json!({ "pattern": "alpha" }))
            .await;
        assert_eq!(out["success"], json!(true), "{out}");
        assert_eq!(out["total_found"], json!(1));
    });
}

#[test]
fn test_search_outside_workspace_is_rejected() {
    fixture::run(|fixture| async move {
        let out = fixture
            .call("search_content", json!({ "query": "root", "path": "../" }))
            .await;
        assert_eq!(out["success"], json!(false));
        assert_eq!(out["error_kind"], json!("policy"));
    });
}
