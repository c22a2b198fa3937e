use std::cmp::Ordering;

use serde::Serialize;
use tantivy::{
    DocAddress,
    DocId,
    Score,
    SegmentOrdinal,
    SegmentReader,
    TantivyDocument,
    collector::{Collector, SegmentCollector},
    query::Query,
};

use crate::{
    document::StoredDocument,
    error::{Error, Result},
    snapshot::Snapshot,
};

/// Marker of the last result already seen: a search resumed after it
/// returns only results that rank strictly below it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cursor {
    pub score: Score,
    pub address: DocAddress,
}

/// A search result from a snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub score: f32,
    #[serde(skip)]
    pub address: DocAddress,
    pub document: StoredDocument,
}

impl SearchHit {
    pub fn cursor(&self) -> Cursor {
        Cursor {
            score: self.score,
            address: self.address,
        }
    }
}

/// Result order: descending score, ties broken by ascending address.
fn rank_order(a: &(Score, DocAddress), b: &(Score, DocAddress)) -> Ordering {
    b.0.total_cmp(&a.0).then_with(|| {
        (a.1.segment_ord, a.1.doc_id).cmp(&(b.1.segment_ord, b.1.doc_id))
    })
}

fn ranks_after(hit: &(Score, DocAddress), cursor: &Cursor) -> bool {
    rank_order(hit, &(cursor.score, cursor.address)) == Ordering::Greater
}

/// Collects the top `limit` hits in result order, skipping everything that
/// ranks at or above an optional cursor.
struct RankedCollector {
    limit: usize,
    after: Option<Cursor>,
}

struct RankedSegmentCollector {
    segment_ord: SegmentOrdinal,
    limit: usize,
    after: Option<Cursor>,
    hits: Vec<(Score, DocAddress)>,
}

fn truncate_ranked(hits: &mut Vec<(Score, DocAddress)>, limit: usize) {
    hits.sort_by(rank_order);
    hits.truncate(limit);
}

impl Collector for RankedCollector {
    type Fruit = Vec<(Score, DocAddress)>;
    type Child = RankedSegmentCollector;

    fn for_segment(
        &self,
        segment_local_id: SegmentOrdinal,
        _segment: &SegmentReader,
    ) -> tantivy::Result<Self::Child> {
        Ok(RankedSegmentCollector {
            segment_ord: segment_local_id,
            limit: self.limit,
            after: self.after,
            hits: Vec::new(),
        })
    }

    fn requires_scoring(&self) -> bool {
        true
    }

    fn merge_fruits(
        &self,
        segment_fruits: Vec<Vec<(Score, DocAddress)>>,
    ) -> tantivy::Result<Self::Fruit> {
        let mut merged: Vec<_> = segment_fruits.into_iter().flatten().collect();
        truncate_ranked(&mut merged, self.limit);
        Ok(merged)
    }
}

impl SegmentCollector for RankedSegmentCollector {
    type Fruit = Vec<(Score, DocAddress)>;

    fn collect(&mut self, doc: DocId, score: Score) {
        let hit = (score, DocAddress::new(self.segment_ord, doc));
        if let Some(cursor) = &self.after
            && !ranks_after(&hit, cursor)
        {
            return;
        }
        self.hits.push(hit);
        // Amortized bound on memory: trim once the buffer doubles.
        if self.hits.len() >= self.limit.saturating_mul(2).max(64) {
            truncate_ranked(&mut self.hits, self.limit);
        }
    }

    fn harvest(mut self) -> Self::Fruit {
        truncate_ranked(&mut self.hits, self.limit);
        self.hits
    }
}

/// Rank matches of `query` without loading stored fields.
pub(crate) fn rank(
    query: &dyn Query,
    snapshot: &Snapshot,
    after: Option<Cursor>,
    limit: usize,
) -> Result<Vec<(Score, DocAddress)>> {
    if limit == 0 {
        return Err(Error::Validation("limit must be positive".into()));
    }
    let collector = RankedCollector { limit, after };
    Ok(snapshot.searcher().search(query, &collector)?)
}

/// Execute `query` against `snapshot`, returning at most `limit` hits by
/// descending score.
pub fn search(
    query: &dyn Query,
    snapshot: &Snapshot,
    limit: usize,
) -> Result<Vec<SearchHit>> {
    search_after(query, snapshot, None, limit)
}

/// Like [`search`], but resumes strictly after `after` when given.
pub fn search_after(
    query: &dyn Query,
    snapshot: &Snapshot,
    after: Option<Cursor>,
    limit: usize,
) -> Result<Vec<SearchHit>> {
    let ranked = rank(query, snapshot, after, limit)?;
    let searcher = snapshot.searcher();

    let mut results = Vec::with_capacity(ranked.len());
    for (score, address) in ranked {
        let doc: TantivyDocument = searcher.doc(address)?;
        results.push(SearchHit {
            score,
            address,
            document: snapshot.schema().stored(&doc),
        });
    }
    Ok(results)
}
