//! Prompt texts for the analysis stages.
//!
//! Each prompt is assembled from the same sections: a role, the task, the
//! context, a numbered protocol and a literal output example. The example is
//! the output contract; downstream stages and strict validation address the
//! response by its tag names.

use super::stage::StageKind;
use super::trend::INSUFFICIENT_DATA_MESSAGE;

/// Sections of one stage prompt.
pub(crate) struct PromptText {
    pub role: &'static str,
    pub task: &'static str,
    pub context: &'static str,
    pub protocol: &'static [&'static str],
    pub output_example: &'static str,
    /// Handlebars block appended before the data (upstream outputs, granularity).
    pub inputs: &'static str,
}

impl PromptText {
    /// Assemble the full Handlebars source.
    pub fn assemble(&self) -> String {
        let protocol = self
            .protocol
            .iter()
            .enumerate()
            .map(|(i, step)| format!("{}. {step}", i + 1))
            .collect::<Vec<_>>()
            .join("\n");

        let mut body = format!(
            "{role}\n\nTask: {task}\nContext: {context}\n\nAnalysis Protocol:\n{protocol}\n\n\
             You must format your response EXACTLY like this example:\n{example}\n\n\
             Do not deviate from this format or add any additional explanations.\n\n\
             Search query: {{{{search_query}}}}\n",
            role = self.role,
            task = self.task,
            context = self.context,
            example = self.output_example.trim(),
        );
        if !self.inputs.is_empty() {
            body.push('\n');
            body.push_str(self.inputs.trim());
            body.push('\n');
        }
        body.push_str("\nData to analyze:\n{{scraped_data}}\n");
        body
    }
}

/// Prompt sections for a stage.
pub(crate) fn prompt_text(stage: StageKind) -> &'static PromptText {
    match stage {
        StageKind::PostType => &POST_TYPE,
        StageKind::Keywords => &KEYWORDS,
        StageKind::Sentiment => &SENTIMENT,
        StageKind::Trend => &TREND,
        StageKind::Synthesis => &SYNTHESIS,
    }
}

/// System message sent ahead of every stage prompt.
pub(crate) const SYSTEM_PROMPT: &str = "You are a meticulous SEO content strategist analyzing \
Reddit discussions. Quote source text exactly, never invent data, and follow the requested \
output format precisely.";

const POST_TYPE: PromptText = PromptText {
    role: "You are an expert content analyst who classifies online discussions by purpose.",
    task: "Classify every post in the data by its primary post type and report how the posts are distributed across types.",
    context: "The data lists Reddit posts collected for the search query below, with titles, body text, upvote scores and comments.",
    protocol: &[
        "Read each post title together with its body text.",
        "Assign each post exactly one type: Question, Recommendation Request, Review or Experience, Comparison, Discussion, News, Guide or Tutorial, Complaint, Other.",
        "Compute each type's share of the posts as a whole-number percentage.",
        "Omit every type with a share of 0%.",
        "Make the percentages sum to exactly 100.",
        "Rank the types from highest to lowest percentage.",
    ],
    output_example: r"
<post_types>
1. Question: 40%
2. Recommendation Request: 30%
3. Review or Experience: 20%
4. Comparison: 10%
</post_types>",
    inputs: "",
};

const KEYWORDS: PromptText = PromptText {
    role: "You are an SEO keyword researcher who mines real user language from forum discussions.",
    task: "Extract the phrases users rely on to express needs, the adjectives they use to judge products, and the domain terminology they use.",
    context: "The data lists Reddit posts and comments with upvote scores. High-upvote language reflects wording the community agrees with.",
    protocol: &[
        "Collect need phrases: wording users use to describe what they want or are looking for.",
        "Collect adjectives: descriptive words users apply to products, brands or experiences.",
        "Collect terminology: domain-specific terms, product names and jargon.",
        "Use exact quotes copied from the source text. Never paraphrase.",
        "Annotate each quote with the upvotes of the post or comment it came from and how often it appears in the data.",
        "List exactly five items per category, sorted by upvotes from highest to lowest.",
        "If fewer than five qualifying quotes exist in a category, list only the ones found. Never invent quotes.",
    ],
    output_example: r#"
<need_phrases>
1. "looking for something that lasts more than one season" (upvotes: 152, frequency: 4)
2. "need a shoe for wide feet" (upvotes: 97, frequency: 6)
3. "want something lighter for race day" (upvotes: 64, frequency: 2)
4. "anyone have a recommendation under $100" (upvotes: 41, frequency: 3)
5. "need better grip on wet rock" (upvotes: 18, frequency: 2)
</need_phrases>
<adjectives>
1. "bouncy" (upvotes: 210, frequency: 9)
2. "durable" (upvotes: 133, frequency: 7)
3. "narrow" (upvotes: 88, frequency: 5)
4. "overpriced" (upvotes: 52, frequency: 3)
5. "stiff" (upvotes: 20, frequency: 2)
</adjectives>
<terminology>
1. "heel-to-toe drop" (upvotes: 175, frequency: 8)
2. "stack height" (upvotes: 120, frequency: 5)
3. "rock plate" (upvotes: 76, frequency: 3)
4. "toe box" (upvotes: 58, frequency: 11)
5. "lugs" (upvotes: 33, frequency: 4)
</terminology>"#,
    inputs: "",
};

const SENTIMENT: PromptText = PromptText {
    role: "You are a sentiment analyst experienced with the tone, irony and in-jokes of online communities.",
    task: "Determine the overall sentiment of the discussion and note any sentiment hidden behind sarcasm or subtext.",
    context: "The data lists Reddit posts and comments with upvote scores. Upvotes indicate how widely a view is shared.",
    protocol: &[
        "Read every post and comment, weighting each by its upvotes.",
        "Choose one overall sentiment label: positive, negative or neutral.",
        "Look for sarcasm, irony or subtext that reverses or softens the literal wording.",
        "If such subtext exists, describe it in one short paragraph with exact quotes and their upvotes.",
        "If no sarcasm or subtext is detected, omit the contextual_sentiment section entirely.",
    ],
    output_example: r#"
<overall_sentiment>positive</overall_sentiment>
<contextual_sentiment>
Several highly upvoted replies praise the shoe sarcastically, for example "great if you enjoy blisters" (upvotes: 88), signalling frustration with sizing rather than approval.
</contextual_sentiment>"#,
    inputs: "",
};

const TREND: PromptText = PromptText {
    role: "You are a market trend analyst who reads community discussions as leading indicators.",
    task: "Describe how topics, user behaviour and market signals change over the collected time range.",
    context: "The data lists timestamped Reddit posts and comments with upvote scores. Group observations by the time granularity given below.",
    protocol: &[
        "Bucket posts and comments by the given time granularity.",
        "Describe how the dominant topics evolve from bucket to bucket.",
        "Describe changes in user behaviour, such as shifts from asking to recommending.",
        "Identify market signals such as emerging brands, price sensitivity or switching intent.",
        "Support every observation with a literal quote from the data and its upvote count.",
        "Never fabricate numbers or trends that the data does not show.",
        "If the data in this time range is too small to show a trend, respond with exactly this sentence and nothing else: Insufficient data for trend analysis in this time range",
    ],
    output_example: r#"
<time_granularity>weekly</time_granularity>
<topic_evolution>
- Week of 2024-04-01: durability complaints dominate, "sole separated after 200 miles" (upvotes: 120)
- Week of 2024-04-08: attention moves to new releases, "the v4 fixed the upper" (upvotes: 95)
</topic_evolution>
<user_behavior>
- Users increasingly share mileage logs before recommending, "at 350 miles and still fine" (upvotes: 61)
</user_behavior>
<market_signals>
- Growing interest in budget alternatives, "not paying $180 again" (upvotes: 143)
</market_signals>"#,
    inputs: "Time granularity: {{granularity}}",
};

const SYNTHESIS: PromptText = PromptText {
    role: "You are a senior SEO content strategist who turns audience research into a content plan.",
    task: "Correlate the four prior analyses with the raw data and produce an SEO content strategy.",
    context: "The prior analyses of the same Reddit data are included below, followed by the raw data. Treat the analyses as findings and the raw data as evidence.",
    protocol: &[
        "Summarize the strategic opportunity in two to four sentences.",
        "Define exactly three content themes, each backed by a quote from the data with its upvotes.",
        "Derive keyword structure patterns: exactly five variables, each with exactly five values taken from the keyword analysis or raw data.",
        "Break down sentiment per brand mentioned in the data as positive, neutral and negative percentages.",
        "Make each brand's percentages sum to exactly 100.",
        "Finish with concrete content recommendations that follow from the themes.",
    ],
    output_example: r#"
<strategic_summary>
Runners researching trail shoes care most about durability and fit for wide feet. Competing pages focus on specs, leaving long-term wear reports underserved.
</strategic_summary>
<content_themes>
1. Long-term durability reviews: "sole separated after 200 miles" (upvotes: 120)
2. Fit guides for wide feet: "need a shoe for wide feet" (upvotes: 97)
3. Budget alternatives to flagship models: "not paying $180 again" (upvotes: 143)
</content_themes>
<keyword_structures>
1. [product]: trail shoes | road shoes | racing flats | hiking boots | recovery sandals
2. [use case]: ultramarathon | muddy trails | daily training | race day | hiking
3. [attribute]: durable | lightweight | wide toe box | waterproof | cushioned
4. [brand]: Hoka | Brooks | Salomon | Altra | Saucony
5. [price]: under $100 | under $150 | budget | premium | on sale
</keyword_structures>
<brand_sentiment>
Hoka: positive 60%, neutral 25%, negative 15%
Brooks: positive 45%, neutral 35%, negative 20%
</brand_sentiment>
<content_recommendations>
1. Publish a 500-mile durability comparison of the top three trail shoes.
2. Create a wide-feet fit guide organized by brand.
3. Maintain a monthly roundup of discounted flagship models.
</content_recommendations>"#,
    inputs: r"
Post type analysis:
{{post_type_analysis}}

Keyword analysis:
{{keyword_analysis}}

Sentiment analysis:
{{sentiment_analysis}}

Trend analysis:
{{trend_analysis}}",
};
