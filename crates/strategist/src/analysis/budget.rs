//! Renders collected posts into prompt text within a character budget.
//!
//! Comments inside each post are listed by score (highest first) with a
//! content-based tie-break, so the text never depends on thread order. When
//! the text exceeds the budget, comments are dropped lowest-score first across
//! all posts; only when every comment is gone are post bodies truncated,
//! starting with the lowest-scoring post. Titles are never cut.

use std::cmp::Ordering;
use std::fmt::Write;

use crate::reddit::{CollectedPost, Comment};

/// Appended to a truncated post body.
pub const TRUNCATION_MARKER: &str = "…[truncated]";

/// Prompt data that fits (or could not be made to fit) a budget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FittedData {
    /// Rendered post data.
    pub text: String,
    /// Comments omitted to meet the budget.
    pub comments_dropped: usize,
    /// Post bodies shortened to meet the budget.
    pub posts_truncated: usize,
    /// Still larger than the budget after all reductions.
    pub over_budget: bool,
}

/// Render posts, shrinking the text until it is at most `max_chars` characters.
#[must_use]
pub fn fit_to_budget(posts: &[CollectedPost], max_chars: usize) -> FittedData {
    let order: Vec<Vec<usize>> = posts.iter().map(|p| canonical_order(&p.comments)).collect();
    let mut view = View {
        posts,
        order: &order,
        dropped: posts.iter().map(|p| vec![false; p.comments.len()]).collect(),
        bodies: vec![None; posts.len()],
    };

    let text = view.render();
    if char_len(&text) <= max_chars {
        return FittedData {
            text,
            comments_dropped: 0,
            posts_truncated: 0,
            over_budget: false,
        };
    }

    // Lowest score first; ties resolved on content.
    let mut drop_queue: Vec<(usize, usize)> = posts
        .iter()
        .enumerate()
        .flat_map(|(p, post)| (0..post.comments.len()).map(move |c| (p, c)))
        .collect();
    drop_queue.sort_by(|a, b| {
        compare_comments(&posts[b.0].comments[b.1], &posts[a.0].comments[a.1])
            .then_with(|| posts[a.0].id.cmp(&posts[b.0].id))
    });

    // Smallest prefix of the queue whose removal fits the budget.
    let (mut lo, mut hi) = (1usize, drop_queue.len());
    let mut fits = false;
    while lo <= hi {
        let mid = lo + (hi - lo) / 2;
        view.drop_first(&drop_queue, mid);
        if char_len(&view.render()) <= max_chars {
            fits = true;
            hi = mid - 1;
        } else {
            lo = mid + 1;
        }
    }

    let comments_dropped = if fits { lo } else { drop_queue.len() };
    view.drop_first(&drop_queue, comments_dropped);
    let mut text = view.render();
    let mut posts_truncated = 0;

    if !fits {
        let mut by_score: Vec<usize> = (0..posts.len()).collect();
        by_score.sort_by(|a, b| {
            posts[*a]
                .score
                .cmp(&posts[*b].score)
                .then_with(|| posts[*b].id.cmp(&posts[*a].id))
        });

        let marker_len = char_len(TRUNCATION_MARKER);
        for idx in by_score {
            let overage = char_len(&text).saturating_sub(max_chars);
            if overage == 0 {
                break;
            }

            let body = &posts[idx].body_text;
            let body_len = char_len(body);
            if body_len <= marker_len {
                continue;
            }

            let keep = body_len.saturating_sub(overage + marker_len);
            let mut shortened: String = body.chars().take(keep).collect();
            shortened.push_str(TRUNCATION_MARKER);
            view.bodies[idx] = Some(shortened);
            posts_truncated += 1;
            text = view.render();
        }
    }

    let over_budget = char_len(&text) > max_chars;
    if over_budget {
        tracing::warn!(
            max_chars,
            actual = char_len(&text),
            "Prompt data still exceeds budget after dropping comments and truncating bodies"
        );
    } else {
        tracing::debug!(
            max_chars,
            comments_dropped,
            posts_truncated,
            "Fitted prompt data to budget"
        );
    }

    FittedData {
        text,
        comments_dropped,
        posts_truncated,
        over_budget,
    }
}

struct View<'a> {
    posts: &'a [CollectedPost],
    order: &'a [Vec<usize>],
    dropped: Vec<Vec<bool>>,
    bodies: Vec<Option<String>>,
}

impl View<'_> {
    fn drop_first(&mut self, queue: &[(usize, usize)], n: usize) {
        for flags in &mut self.dropped {
            flags.fill(false);
        }
        for (p, c) in queue.iter().take(n) {
            self.dropped[*p][*c] = true;
        }
    }

    fn render(&self) -> String {
        let mut out = String::new();

        for (i, post) in self.posts.iter().enumerate() {
            if i > 0 {
                out.push('\n');
            }
            let _ = writeln!(
                out,
                "[Post {}] r/{} | score: {} | comments: {} | posted: {}",
                post.id,
                post.subreddit,
                post.score,
                post.num_comments,
                post.created_at.to_rfc3339()
            );
            let _ = writeln!(out, "Title: {}", post.title);

            let body = self.bodies[i].as_deref().unwrap_or(&post.body_text);
            if !body.is_empty() {
                let _ = writeln!(out, "Body: {body}");
            }

            let kept: Vec<&Comment> = self.order[i]
                .iter()
                .filter(|c| !self.dropped[i][**c])
                .map(|c| &post.comments[*c])
                .collect();
            if !kept.is_empty() {
                out.push_str("Comments:\n");
                for comment in kept {
                    let _ = writeln!(
                        out,
                        "- (score: {}, posted: {}) {}: {}",
                        comment.score,
                        comment.created_at.to_rfc3339(),
                        comment.author,
                        comment.body_text
                    );
                }
            }
        }

        out
    }
}

/// Comment indices sorted highest score first.
fn canonical_order(comments: &[Comment]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..comments.len()).collect();
    order.sort_by(|a, b| compare_comments(&comments[*a], &comments[*b]));
    order
}

/// Total order on comment content: score descending, then time, author, text.
fn compare_comments(a: &Comment, b: &Comment) -> Ordering {
    b.score
        .cmp(&a.score)
        .then_with(|| a.created_at.cmp(&b.created_at))
        .then_with(|| a.author.cmp(&b.author))
        .then_with(|| a.body_text.cmp(&b.body_text))
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}
