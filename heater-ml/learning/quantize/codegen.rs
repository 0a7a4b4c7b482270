use std::fmt::{self, Write};

use super::fixed::{DecisionProgram, FixedNode, FixedTable, QFormat, SCORE_BITS};
use crate::{classical_ml::AlgorithmKind, dataset::N_FEATURES};

/// Entry point declared by the header.
pub const ENTRY_POINT: &str =
    "uint8_t heater_predict(int32_t temp_q, int32_t humidity_q, int32_t light_q)";
/// C parameter names in feature order.
pub const INPUT_NAMES: [&str; N_FEATURES] = ["temp_q", "humidity_q", "light_q"];
/// Macro prefixes of the per-feature bin ranges.
const RANGE_MACROS: [&str; N_FEATURES] = ["HEATER_TEMP", "HEATER_HUMIDITY", "HEATER_LIGHT"];
const UNUSED_INPUTS: &str = "    (void)temp_q;\n    (void)humidity_q;\n    (void)light_q;\n";

/// Labels rendered into the banner comment.
#[derive(Debug, Clone, Copy)]
pub struct CodegenContext<'a> {
    /// Specification the model came from.
    pub model_name: &'a str,
    /// Algorithm family.
    pub kind: AlgorithmKind,
    /// Input format.
    pub q: QFormat,
}

fn banner(out: &mut String, ctx: &CodegenContext<'_>, program: &DecisionProgram) -> fmt::Result {
    let strategy = if program.is_table() { "table" } else { "branch" };
    writeln!(out, "/*")?;
    writeln!(out, " * Heater ON/OFF classifier, generated by heater-ml. Do not edit.")?;
    writeln!(out, " * model: {} ({})", ctx.model_name, ctx.kind)?;
    writeln!(out, " * strategy: {strategy}")?;
    writeln!(
        out,
        " * inputs: Q-format integers with {} fractional bits",
        ctx.q.fractional_bits
    )?;
    writeln!(out, " * integer arithmetic only, no dynamic allocation")?;
    writeln!(out, " */")
}

/// Renders `heater_model.h`.
pub fn render_header(
    ctx: &CodegenContext<'_>,
    program: &DecisionProgram,
    bins: &[(i32, i32, usize); N_FEATURES],
) -> Result<String, fmt::Error> {
    let mut out = String::new();
    banner(&mut out, ctx, program)?;
    writeln!(out, "#ifndef HEATER_MODEL_H")?;
    writeln!(out, "#define HEATER_MODEL_H")?;
    writeln!(out)?;
    writeln!(out, "#include <math.h>")?;
    writeln!(out, "#include <stdint.h>")?;
    writeln!(out)?;
    writeln!(out, "#define HEATER_FRAC_BITS {}", ctx.q.fractional_bits)?;
    writeln!(out, "/* Host-side conversion of a reading to Q format (floor). */")?;
    writeln!(
        out,
        "#define HEATER_TO_Q(x) ((int32_t)floor((double)(x) * (double)(1L << HEATER_FRAC_BITS)))"
    )?;
    writeln!(out)?;
    for (prefix, (lo, hi, count)) in RANGE_MACROS.iter().zip(bins) {
        writeln!(out, "#define {prefix}_MIN_Q ({lo})")?;
        writeln!(out, "#define {prefix}_MAX_Q ({hi})")?;
        writeln!(out, "#define {prefix}_BINS ({count})")?;
    }
    writeln!(out)?;
    writeln!(out, "#ifdef __cplusplus")?;
    writeln!(out, "extern \"C\" {{")?;
    writeln!(out, "#endif")?;
    writeln!(out)?;
    writeln!(out, "{ENTRY_POINT};")?;
    writeln!(out)?;
    writeln!(out, "#ifdef __cplusplus")?;
    writeln!(out, "}}")?;
    writeln!(out, "#endif")?;
    writeln!(out)?;
    writeln!(out, "#endif /* HEATER_MODEL_H */")?;
    Ok(out)
}

/// Renders `heater_model.c`.
pub fn render_source(ctx: &CodegenContext<'_>, program: &DecisionProgram) -> Result<String, fmt::Error> {
    let mut out = String::new();
    banner(&mut out, ctx, program)?;
    writeln!(out, "#include \"heater_model.h\"")?;
    writeln!(out)?;
    match program {
        DecisionProgram::Tree { root } => {
            writeln!(out, "{ENTRY_POINT}")?;
            writeln!(out, "{{")?;
            out.push_str(UNUSED_INPUTS);
            render_node(&mut out, root, 1, &|value| format!("{value}"))?;
            writeln!(out, "}}")?;
        }
        DecisionProgram::Vote { trees } => {
            render_members(&mut out, trees, "uint8_t", &|value| format!("{value}"))?;
            writeln!(out, "{ENTRY_POINT}")?;
            writeln!(out, "{{")?;
            writeln!(out, "    uint32_t votes = 0u;")?;
            for idx in 0..trees.len() {
                writeln!(
                    out,
                    "    votes += heater_tree_{idx}(temp_q, humidity_q, light_q);"
                )?;
            }
            writeln!(out, "    return (uint8_t)(votes * 2u > {}u);", trees.len())?;
            writeln!(out, "}}")?;
        }
        DecisionProgram::Additive { bias, trees } => {
            writeln!(out, "/* Scores carry {SCORE_BITS} fractional bits. */")?;
            render_members(&mut out, trees, "int64_t", &|value| format!("INT64_C({value})"))?;
            writeln!(out, "{ENTRY_POINT}")?;
            writeln!(out, "{{")?;
            writeln!(out, "    int64_t score = INT64_C({bias});")?;
            for idx in 0..trees.len() {
                writeln!(
                    out,
                    "    score += heater_tree_{idx}(temp_q, humidity_q, light_q);"
                )?;
            }
            writeln!(out, "    return (uint8_t)(score > 0);")?;
            writeln!(out, "}}")?;
        }
        DecisionProgram::Linear { coefficients, bias } => {
            writeln!(
                out,
                "/* Coefficients carry {SCORE_BITS} fractional bits; the bias carries {SCORE_BITS} + HEATER_FRAC_BITS. */"
            )?;
            writeln!(out, "{ENTRY_POINT}")?;
            writeln!(out, "{{")?;
            writeln!(out, "    int64_t score = INT64_C({bias});")?;
            for (coefficient, input) in coefficients.iter().zip(INPUT_NAMES) {
                writeln!(out, "    score += INT64_C({coefficient}) * (int64_t){input};")?;
            }
            writeln!(out, "    return (uint8_t)(score > 0);")?;
            writeln!(out, "}}")?;
        }
        DecisionProgram::Table { table } => render_table(&mut out, table)?,
    }
    Ok(out)
}

fn render_members(
    out: &mut String,
    trees: &[FixedNode],
    return_type: &str,
    leaf: &dyn Fn(i64) -> String,
) -> fmt::Result {
    for (idx, tree) in trees.iter().enumerate() {
        writeln!(
            out,
            "static {return_type} heater_tree_{idx}(int32_t temp_q, int32_t humidity_q, int32_t light_q)"
        )?;
        writeln!(out, "{{")?;
        out.push_str(UNUSED_INPUTS);
        render_node(out, tree, 1, leaf)?;
        writeln!(out, "}}")?;
        writeln!(out)?;
    }
    Ok(())
}

fn render_node(
    out: &mut String,
    node: &FixedNode,
    depth: usize,
    leaf: &dyn Fn(i64) -> String,
) -> fmt::Result {
    let pad = "    ".repeat(depth);
    match node {
        FixedNode::Leaf(value) => writeln!(out, "{pad}return {};", leaf(*value)),
        FixedNode::Split {
            feature,
            threshold,
            left,
            right,
        } => {
            writeln!(out, "{pad}if ({} <= {threshold}) {{", INPUT_NAMES[*feature])?;
            render_node(out, left, depth + 1, leaf)?;
            writeln!(out, "{pad}}} else {{")?;
            render_node(out, right, depth + 1, leaf)?;
            writeln!(out, "{pad}}}")
        }
    }
}

fn render_table(out: &mut String, table: &FixedTable) -> fmt::Result {
    writeln!(
        out,
        "/* Labels in temperature-major, then humidity, then light order; bit i of byte k is entry 8k + i. */"
    )?;
    writeln!(out, "static const uint8_t heater_table[{}] = {{", table.packed.len())?;
    for chunk in table.packed.chunks(16) {
        let line: Vec<String> = chunk.iter().map(|byte| format!("0x{byte:02x}")).collect();
        writeln!(out, "    {},", line.join(", "))?;
    }
    writeln!(out, "}};")?;
    writeln!(out)?;
    writeln!(
        out,
        "static uint32_t heater_bin(int32_t value, int32_t lo, int32_t hi, uint32_t bins)"
    )?;
    writeln!(out, "{{")?;
    writeln!(out, "    int64_t idx;")?;
    writeln!(out, "    if (value <= lo) {{")?;
    writeln!(out, "        return 0u;")?;
    writeln!(out, "    }}")?;
    writeln!(out, "    if (value >= hi) {{")?;
    writeln!(out, "        return bins - 1u;")?;
    writeln!(out, "    }}")?;
    writeln!(
        out,
        "    idx = ((int64_t)value - (int64_t)lo) * (int64_t)bins / ((int64_t)hi - (int64_t)lo);"
    )?;
    writeln!(
        out,
        "    return idx < (int64_t)bins ? (uint32_t)idx : bins - 1u;"
    )?;
    writeln!(out, "}}")?;
    writeln!(out)?;
    writeln!(out, "{ENTRY_POINT}")?;
    writeln!(out, "{{")?;
    for ((var, input), prefix) in ["t", "h", "l"].iter().zip(INPUT_NAMES).zip(RANGE_MACROS) {
        writeln!(
            out,
            "    uint32_t {var} = heater_bin({input}, {prefix}_MIN_Q, {prefix}_MAX_Q, {prefix}_BINS);"
        )?;
    }
    writeln!(
        out,
        "    uint32_t idx = (t * {h}u + h) * {l}u + l;",
        h = table.bins[1].bins,
        l = table.bins[2].bins
    )?;
    writeln!(
        out,
        "    return (uint8_t)((heater_table[idx >> 3] >> (idx & 7u)) & 1u);"
    )?;
    writeln!(out, "}}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quantize::fixed::FixedBins;

    fn ctx() -> CodegenContext<'static> {
        CodegenContext {
            model_name: "tree",
            kind: AlgorithmKind::DecisionTree,
            q: QFormat::default(),
        }
    }

    fn stump() -> DecisionProgram {
        DecisionProgram::Tree {
            root: FixedNode::Split {
                feature: 0,
                threshold: 6144,
                left: Box::new(FixedNode::Leaf(1)),
                right: Box::new(FixedNode::Leaf(0)),
            },
        }
    }

    #[test]
    fn header_declares_entry_point_and_macros() {
        let header = render_header(&ctx(), &stump(), &[(3328, 10240, 32); 3]).unwrap();
        assert!(header.contains("#define HEATER_FRAC_BITS 8"));
        assert!(header.contains("#define HEATER_TEMP_MIN_Q (3328)"));
        assert!(header.contains("#include <math.h>"));
        assert!(header.contains("((int32_t)floor((double)(x) * "));
        assert!(header.contains(&format!("{ENTRY_POINT};")));
    }

    #[test]
    fn tree_source_uses_integer_comparisons() {
        let source = render_source(&ctx(), &stump()).unwrap();
        assert!(source.contains("if (temp_q <= 6144) {"));
        assert!(source.contains("return 1;"));
        assert!(!source.contains("float"));
        assert!(!source.contains("double"));
        assert_eq!(source.matches('{').count(), source.matches('}').count());
    }

    #[test]
    fn table_source_embeds_packed_bytes() {
        let program = DecisionProgram::Table {
            table: FixedTable {
                bins: [FixedBins {
                    lo: 0,
                    hi: 512,
                    bins: 2,
                }; 3],
                packed: vec![0b1010_0101],
            },
        };
        let source = render_source(&ctx(), &program).unwrap();
        assert!(source.contains("static const uint8_t heater_table[1] = {"));
        assert!(source.contains("0xa5,"));
        assert!(source.contains("(t * 2u + h) * 2u + l"));
    }

    #[test]
    fn additive_source_sums_member_scores() {
        let program = DecisionProgram::Additive {
            bias: -42,
            trees: vec![FixedNode::Leaf(7), FixedNode::Leaf(-3)],
        };
        let source = render_source(&ctx(), &program).unwrap();
        assert!(source.contains("int64_t score = INT64_C(-42);"));
        assert!(source.contains("static int64_t heater_tree_1("));
        assert!(source.contains("return INT64_C(-3);"));
    }
}
