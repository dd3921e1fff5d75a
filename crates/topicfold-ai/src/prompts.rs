//! Prompt text for the three stages.

use topicfold_core::Category;

pub fn summarize_system() -> String {
    "INSTRUCTIONS:\n\
     You are a helpful bot. You will receive a piece of text.\n\
     Your job is to identify the main topic of the text.\n\n\
     RULES:\n\
     Return a string containing the primary topic of the text. Each topic MUST BE five words or fewer.\n\
     Your response can contain only one reason."
        .to_string()
}

pub fn classify_system(category: Category) -> String {
    let c = category.as_str();
    format!(
        "You are a helpful bot that is given a list of {c}s and a single piece of text.\n\
         Assign one of the {c}s to the text. The {c}s are separated by the '|' character.\n\
         If you cannot find an appropriate {c}, simply respond '{none}'.\n\n\
         Instructions:\n\
         - Assign one of the {c}s to the text\n\
         - Use only {c}s from the list you are given without changing names or extrapolating\n\
         - If none of the {c}s fit, respond '{none}'",
        none = category.none_answer()
    )
}

pub fn classify_user(labels: &[String], text: &str) -> String {
    format!(
        "Topics:\n{}\n\nPiece of Text:\n{text}\n\nAssigned Topic:",
        labels.join("|")
    )
}

/// System prompt for a first-round reduction over raw corpus items.
pub fn condense_first_round(num_topics: usize, parent_topic: Option<&str>) -> String {
    let (context, rule) = match parent_topic {
        Some(parent) => (
            format!(
                " These topics were all initially categorized as {parent}. \
                 All topics should be subtopics of {parent}"
            ),
            format!("\n- generate subtopics of {parent}"),
        ),
        None => (String::new(), String::new()),
    };
    format!(
        "Given the following topics, try and combine them into a single set of COMMON topics. \
         You can merge common topics together.{context}\n\n\
         Rules:\n\
         - only generate maximum {num_topics} topics total\n\
         - return a numbered list of descriptions\n\
         - rank more common topics higher than less common topics{rule}"
    )
}

/// System prompt for the final merge of the first-round lists.
pub fn condense_final(num_topics: usize) -> String {
    format!(
        "Given the following sets of topics, try and combine them into a single set of COMMON topics. \
         The topics have already been condensed and ranked multiple separate times.\n\
         A higher rank indicates that a topic was more common in the dataset. \
         You can merge common topics together.\n\n\
         Rules:\n\
         - only generate maximum {num_topics} topics total\n\
         - include examples within () characters\n\
         - weight higher ranked topics more than lower ranked topics\n\
         - return the list formatted like so: 1. [Topic Name] ([short list of examples])"
    )
}

/// One item per line, in order.
pub fn render_topics<S: AsRef<str>>(items: &[S]) -> String {
    items
        .iter()
        .map(|item| item.as_ref())
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn condense_user(rendered_topics: &str) -> String {
    format!("Topics:\n{rendered_topics}\n\nCombined Topics:")
}
