use std::fmt::{self, Write};

use crate::{classical_ml::tree::TreeNode, dataset::FEATURE_NAMES};

/// Renders a classification tree as indented text rules.
pub fn render_rules(model_name: &str, tree: &TreeNode) -> Result<String, fmt::Error> {
    let mut out = String::new();
    writeln!(out, "Decision rules for {model_name}")?;
    writeln!(
        out,
        "depth {}, {} nodes; class 1 = heater ON",
        tree.depth(),
        tree.node_count()
    )?;
    writeln!(out)?;
    render(&mut out, tree, 0)?;
    Ok(out)
}

fn render(out: &mut String, node: &TreeNode, depth: usize) -> fmt::Result {
    let prefix = "|   ".repeat(depth);
    match node {
        TreeNode::Leaf { value, samples } => writeln!(
            out,
            "{prefix}|--- class: {} (p_on={value:.3}, samples={samples})",
            u8::from(*value > 0.5)
        ),
        TreeNode::Split {
            feature,
            threshold,
            left,
            right,
        } => {
            let name = FEATURE_NAMES[*feature];
            writeln!(out, "{prefix}|--- {name} <= {threshold:.2}")?;
            render(out, left, depth + 1)?;
            writeln!(out, "{prefix}|--- {name} >  {threshold:.2}")?;
            render(out, right, depth + 1)
        }
    }
}
