//! End-to-end query behavior through a full library: structured
//! narrowing, free-text refinement, semantic ranking, and the
//! abort-on-missing-record contract between the indices.

use std::collections::HashSet;

use refbase::Error;
use refbase::query::{CompoundQuery, QueryOutcome, SearchField, SemanticQuery, TextQuery};
use refbase::record::DocumentDraft;
use refbase::store::{FilterCriteria, TextMatch};
use refbase::test_utils::fixtures::LibraryFixture;

async fn seed_corpus(fx: &LibraryFixture) {
    let drafts = [
        DocumentDraft::new("Attention Is All You Need", 2017, vec!["Vaswani, Ashish".into()])
            .with_id("d1")
            .with_tags(["nlp".to_string(), "nlp->transformers".to_string()])
            .with_publication("NeurIPS")
            .with_abstract("We propose the transformer, an architecture based solely on attention mechanisms."),
        DocumentDraft::new("Deep Residual Learning", 2016, vec!["He, Kaiming".into()])
            .with_id("d2")
            .with_tags(["vision".to_string()])
            .with_publication("CVPR")
            .with_abstract("Residual connections ease the training of very deep convolutional networks."),
        DocumentDraft::new("BERT Pre-training", 2019, vec!["Devlin, Jacob".into()])
            .with_id("d3")
            .with_tags(["nlp".to_string(), "nlp->bert".to_string()])
            .with_publication("NAACL")
            .with_abstract("Bidirectional encoder representations from transformers for language understanding."),
    ];
    for draft in drafts {
        fx.library.store().insert(draft).await.unwrap();
    }
}

fn ids_of(outcome: QueryOutcome) -> HashSet<String> {
    outcome.into_ids().into_iter().collect()
}

#[tokio::test]
async fn test_pure_structured_query_is_unordered() {
    let fx = LibraryFixture::new().await;
    seed_corpus(&fx).await;

    let query = CompoundQuery::new().with_filters(FilterCriteria::new().with_tag("nlp"));
    let outcome = fx.library.query(&query).await.unwrap();
    assert!(matches!(outcome, QueryOutcome::Unordered(_)));
    assert_eq!(
        ids_of(outcome),
        HashSet::from(["d1".to_string(), "d3".to_string()])
    );
}

#[tokio::test]
async fn test_free_text_refines_structured_results() {
    let fx = LibraryFixture::new().await;
    seed_corpus(&fx).await;

    // Tag narrows to {d1, d3}; the title pattern keeps only d1.
    let query = CompoundQuery::new()
        .with_filters(FilterCriteria::new().with_tag("nlp"))
        .with_free_text(TextQuery::substring(SearchField::Title, "attention").ignoring_case());
    let outcome = fx.library.query(&query).await.unwrap();
    assert_eq!(ids_of(outcome), HashSet::from(["d1".to_string()]));

    // Without structured filters the pattern scans the whole library.
    let query = CompoundQuery::new()
        .with_free_text(TextQuery::regex(SearchField::Publication, "^(NeurIPS|NAACL)$"));
    let outcome = fx.library.query(&query).await.unwrap();
    assert_eq!(
        ids_of(outcome),
        HashSet::from(["d1".to_string(), "d3".to_string()])
    );
}

#[tokio::test]
async fn test_semantic_query_ranks_exact_text_first() {
    let fx = LibraryFixture::new().await;
    seed_corpus(&fx).await;
    let summary = fx.library.index_features().await.unwrap();
    assert_eq!(summary.embedded, 3);

    let text = "Residual connections ease the training of very deep convolutional networks.";
    let query = CompoundQuery::new().with_semantic(SemanticQuery::new(text).with_k(2));
    let outcome = fx.library.query(&query).await.unwrap();

    let QueryOutcome::Ranked(hits) = outcome else {
        panic!("semantic query must rank");
    };
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].0, "d2");
    assert!(hits[0].1 > 0.999);
    assert!(hits[0].1 >= hits[1].1);
}

#[tokio::test]
async fn test_semantic_respects_structured_narrowing() {
    let fx = LibraryFixture::new().await;
    seed_corpus(&fx).await;
    fx.library.index_features().await.unwrap();

    // d2's own abstract, but the tag filter rules d2 out of the
    // candidate set before the vector scan.
    let text = "Residual connections ease the training of very deep convolutional networks.";
    let query = CompoundQuery::new()
        .with_filters(FilterCriteria::new().with_tag("nlp"))
        .with_semantic(SemanticQuery::new(text).with_k(10));
    let outcome = fx.library.query(&query).await.unwrap();

    let QueryOutcome::Ranked(hits) = outcome else {
        panic!("semantic query must rank");
    };
    let ids: HashSet<&str> = hits.iter().map(|(id, _)| id.as_str()).collect();
    assert!(!ids.contains("d2"));
    assert!(ids.is_subset(&HashSet::from(["d1", "d3"])));

    // A filter with no survivors short-circuits to an empty ranking.
    let query = CompoundQuery::new()
        .with_filters(FilterCriteria::new().with_tag("astronomy"))
        .with_semantic(SemanticQuery::new(text));
    let outcome = fx.library.query(&query).await.unwrap();
    assert_eq!(outcome, QueryOutcome::Ranked(Vec::new()));
}

#[tokio::test]
async fn test_missing_record_aborts_semantic_query() {
    let fx = LibraryFixture::new().await;
    seed_corpus(&fx).await;
    fx.library.index_features().await.unwrap();

    // Remove the record but leave its vector behind: the next semantic
    // query trips over the gap and reports it instead of papering over.
    fx.library.store().remove("d2").await.unwrap();
    let text = "Residual connections ease the training of very deep convolutional networks.";
    let query = CompoundQuery::new().with_semantic(SemanticQuery::new(text).with_k(3));
    let err = fx.library.query(&query).await;
    assert!(matches!(err, Err(Error::NotFound { .. })));

    // The next indexing cycle prunes the orphan and queries recover.
    let summary = fx.library.index_features().await.unwrap();
    assert_eq!(summary.pruned, 1);
    let outcome = fx.library.query(&query).await.unwrap();
    let ids = ids_of(outcome);
    assert!(!ids.contains("d2"));
    assert!(!ids.is_empty());
}

#[tokio::test]
async fn test_unknown_tag_yields_empty_not_error() {
    let fx = LibraryFixture::new().await;
    seed_corpus(&fx).await;

    let query = CompoundQuery::new().with_filters(FilterCriteria::new().with_tag("no-such-tag"));
    let outcome = fx.library.query(&query).await.unwrap();
    assert!(outcome.is_empty());
}

#[tokio::test]
async fn test_malformed_regex_is_a_validation_error() {
    let fx = LibraryFixture::new().await;
    seed_corpus(&fx).await;

    let query =
        CompoundQuery::new().with_free_text(TextQuery::regex(SearchField::Title, "(unclosed"));
    let err = fx.library.query(&query).await;
    assert!(matches!(err, Err(Error::Validation(_))));
}

#[tokio::test]
async fn test_reopened_library_serves_the_same_queries() {
    let fx = LibraryFixture::new().await;
    seed_corpus(&fx).await;
    fx.library.index_features().await.unwrap();
    fx.library.commit_all().await.unwrap();

    let reopened = fx.reopen().await;
    let query = CompoundQuery::new().with_filters(
        FilterCriteria::new().with_title(TextMatch::substring("learning").ignoring_case()),
    );
    let outcome = reopened.query(&query).await.unwrap();
    assert_eq!(ids_of(outcome), HashSet::from(["d2".to_string()]));

    let text = "Bidirectional encoder representations from transformers for language understanding.";
    let semantic = CompoundQuery::new().with_semantic(SemanticQuery::new(text).with_k(1));
    let outcome = reopened.query(&semantic).await.unwrap();
    assert_eq!(outcome.into_ids(), vec!["d3".to_string()]);
}
