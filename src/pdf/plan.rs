//! Greedy, order-preserving split of pages into size-bounded documents.

use serde::Serialize;

use super::page::RenderedPage;

/// Pages assigned to one output document
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PdfDocumentPlan {
    /// 1-based
    pub part_number: usize,
    pub pages: Vec<RenderedPage>,
    /// Document overhead plus the estimated size of every page
    pub estimated_size: u64,
}

/// Fills one plan at a time.
///
/// A page joins the current plan if the plan is empty or if its size still
/// fits under the ceiling; otherwise the current plan is closed and the page
/// opens the next one. A single page larger than the ceiling gets a plan of
/// its own.
#[derive(Debug)]
pub struct DocumentPlanner {
    ceiling: u64,
    base_overhead: u64,
    current: PdfDocumentPlan,
}

impl DocumentPlanner {
    pub fn new(ceiling: u64, base_overhead: u64) -> Self {
        DocumentPlanner {
            ceiling,
            base_overhead,
            current: PdfDocumentPlan {
                part_number: 1,
                pages: Vec::new(),
                estimated_size: base_overhead,
            },
        }
    }

    /// Place the next page; returns the plan it closed, if any
    pub fn push(&mut self, page: RenderedPage) -> Option<PdfDocumentPlan> {
        let fits = self.current.pages.is_empty()
            || self.current.estimated_size.saturating_add(page.estimated_size) <= self.ceiling;

        let closed = if fits {
            None
        } else {
            let next = PdfDocumentPlan {
                part_number: self.current.part_number + 1,
                pages: Vec::new(),
                estimated_size: self.base_overhead,
            };
            Some(std::mem::replace(&mut self.current, next))
        };

        self.current.estimated_size = self.current.estimated_size.saturating_add(page.estimated_size);
        self.current.pages.push(page);
        closed
    }

    /// Close the last plan; `None` when no page was ever pushed
    pub fn finish(self) -> Option<PdfDocumentPlan> {
        (!self.current.pages.is_empty()).then_some(self.current)
    }
}

/// Plan a whole sequence at once
pub fn plan_documents(
    pages: impl IntoIterator<Item = RenderedPage>,
    ceiling: u64,
    base_overhead: u64,
) -> Vec<PdfDocumentPlan> {
    let mut planner = DocumentPlanner::new(ceiling, base_overhead);
    let mut plans: Vec<_> = pages.into_iter().filter_map(|page| planner.push(page)).collect();
    plans.extend(planner.finish());
    plans
}
