use std::rc::Rc;

use crate::omap::OrderedStringMap;
use crate::value::{infer_field_value, TypeInference, Value};


// The record context an evaluator tree runs against: the current
// record's fields as raw text, plus the stream position. Field text
// is typed lazily, at read time, under the inference mode captured
// when the reading evaluator was built.
pub struct Variables {
    fields: OrderedStringMap<String>,
    pub nr: i64,
    pub fnr: i64,
    pub filenum: i64,
    pub filename: Rc<String>,
}


impl Variables {
    pub fn new() -> Variables {
        Variables {
            fields: OrderedStringMap::new(),
            nr: 0,
            fnr: 0,
            filenum: 0,
            filename: Rc::new(String::new()),
        }
    }

    pub fn set_field(&mut self, name: &str, raw: &str) {
        self.fields.put(&[name], String::from(raw));
    }

    pub fn field(&self, name: &str, mode: TypeInference) -> Value {
        match self.fields.get(&[name]) {
            Some(raw) => infer_field_value(raw, mode),
            None => Value::Absent,
        }
    }

    pub fn nf(&self) -> i64 {
        self.fields.len() as i64
    }

    // NF, NR, FNR, FILENAME, FILENUM, and the math constants the
    // parser passes through by name.
    pub fn context_variable(&self, name: &str) -> Value {
        match name {
            "NF" => Value::Int(self.nf()),
            "NR" => Value::Int(self.nr),
            "FNR" => Value::Int(self.fnr),
            "FILENUM" => Value::Int(self.filenum),
            "FILENAME" => Value::Str(self.filename.clone()),
            "PI" => Value::Float(std::f64::consts::PI),
            "E" => Value::Float(std::f64::consts::E),
            _ => Value::Absent,
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_inference_modes() {
        let mut vars = Variables::new();
        vars.set_field("a", "3");
        vars.set_field("b", "2.5");
        vars.set_field("c", "xyz");
        vars.set_field("d", "");

        assert_eq!(vars.field("a", TypeInference::IntFloatString), Value::Int(3));
        assert_eq!(vars.field("a", TypeInference::FloatString), Value::Float(3.0));
        assert_eq!(
            vars.field("a", TypeInference::StringOnly),
            Value::from_string("3")
        );
        assert_eq!(
            vars.field("b", TypeInference::IntFloatString),
            Value::Float(2.5)
        );
        assert_eq!(
            vars.field("c", TypeInference::IntFloatString),
            Value::from_string("xyz")
        );
        assert_eq!(vars.field("d", TypeInference::IntFloatString), Value::Empty);
        assert_eq!(
            vars.field("missing", TypeInference::IntFloatString),
            Value::Absent
        );
    }

    #[test]
    fn test_context_variables() {
        let mut vars = Variables::new();
        vars.set_field("a", "1");
        vars.set_field("b", "2");
        vars.nr = 7;
        vars.fnr = 3;
        vars.filenum = 2;
        vars.filename = Rc::new(String::from("in.dat"));

        assert_eq!(vars.context_variable("NF"), Value::Int(2));
        assert_eq!(vars.context_variable("NR"), Value::Int(7));
        assert_eq!(vars.context_variable("FNR"), Value::Int(3));
        assert_eq!(vars.context_variable("FILENUM"), Value::Int(2));
        assert_eq!(
            vars.context_variable("FILENAME"),
            Value::from_string("in.dat")
        );
        assert_eq!(
            vars.context_variable("PI"),
            Value::Float(std::f64::consts::PI)
        );
        assert_eq!(vars.context_variable("nope"), Value::Absent);
    }
}
