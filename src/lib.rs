// reckon: record-processing tool with an embedded expression
// language; this crate is its expression-evaluation core.
//
// Copyright (C) 2020  Brandon Lewis
//
// This program is free software: you can redistribute it and/or
// modify it under the terms of the GNU Lesser General Public License
// as published by the Free Software Foundation, either version 3 of
// the License, or (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU
// Lesser General Public License for more details.
//
// You should have received a copy of the GNU Lesser General Public
// License along with this program.  If not, see
// <https://www.gnu.org/licenses/>.

extern crate chrono;
extern crate enumflags2;
extern crate fnv;
extern crate log;
extern crate rand;
extern crate regex;
#[macro_use]
extern crate lazy_static;


pub mod ast;
pub mod catalog;
pub mod eval;
pub mod manager;
pub mod omap;
pub mod util;
pub mod value;
pub mod vars;
